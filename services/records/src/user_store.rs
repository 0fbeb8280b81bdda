use crate::key_generator::UserKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};

/// Profile attributes of a new user, already validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub surname: String,
    pub patronymic: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: String,
}

/// Partial profile update. `None` leaves a field unchanged; for `email`,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub patronymic: Option<String>,
    pub phone: Option<String>,
    pub email: Option<Option<String>>,
    pub address: Option<String>,
}

/// A persisted user with its media lists decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub key: UserKey,
    pub name: String,
    pub surname: String,
    pub patronymic: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: String,
    pub photos: Vec<String>,
    pub videos: Vec<String>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// Row to insert; `id` is assigned by the store
#[derive(Debug, Clone)]
pub struct NewUser {
    pub key: UserKey,
    pub profile: Profile,
    pub photos: Vec<String>,
    pub videos: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Column changes for `update_by_key`. `None` media lists are left as stored.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub profile: ProfilePatch,
    pub photos: Option<Vec<String>>,
    pub videos: Option<Vec<String>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key {0} is already taken")]
    DuplicateKey(UserKey),

    #[error("row {id} is malformed: {reason}")]
    Malformed { id: i64, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Row-oriented access to the `users` relation.
///
/// Lookups return `None` for a missing row; mutations return the number of
/// affected rows, so 0 means not found.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &NewUser) -> Result<i64, StoreError>;

    async fn find_by_key(&self, key: &UserKey) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError>;

    async fn update_by_key(&self, key: &UserKey, changes: &UserChanges) -> Result<u64, StoreError>;

    async fn delete_by_key(&self, key: &UserKey) -> Result<u64, StoreError>;

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError>;
}

/// Media lists are persisted as a JSON array in a single text column
pub fn encode_media(files: &[String]) -> String {
    serde_json::Value::from(files.to_vec()).to_string()
}

pub fn decode_media(raw: &str) -> Result<Vec<String>, serde_json::Error> {
    if raw.trim().is_empty() || raw.trim() == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    key: String,
    name: String,
    surname: String,
    patronymic: String,
    phone: String,
    email: Option<String>,
    address: String,
    photos: String,
    videos: String,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| StoreError::Malformed { id: row.id, reason };

        let key = UserKey::parse(&row.key).map_err(|e| malformed(format!("key: {e}")))?;
        let photos = decode_media(&row.photos).map_err(|e| malformed(format!("photos: {e}")))?;
        let videos = decode_media(&row.videos).map_err(|e| malformed(format!("videos: {e}")))?;

        Ok(Self {
            id: row.id,
            key,
            name: row.name,
            surname: row.surname,
            patronymic: row.patronymic,
            phone: row.phone,
            email: row.email,
            address: row.address,
            photos,
            videos,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

const USER_COLUMNS: &str = r#"
    id, key, name, surname, patronymic, phone, email, address,
    photos, videos, create_time, update_time
"#;

/// PostgreSQL-backed user store
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(key: &UserKey, err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::DuplicateKey(key.clone())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip_all, fields(key = %user.key))]
    async fn insert(&self, user: &NewUser) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (
                key, name, surname, patronymic, phone, email, address,
                photos, videos, create_time, update_time
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $10
            )
            RETURNING id
            "#,
        )
        .bind(user.key.as_str())
        .bind(&user.profile.name)
        .bind(&user.profile.surname)
        .bind(&user.profile.patronymic)
        .bind(&user.profile.phone)
        .bind(&user.profile.email)
        .bind(&user.profile.address)
        .bind(encode_media(&user.photos))
        .bind(encode_media(&user.videos))
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(&user.key, e))?;

        debug!(id, "User row inserted");
        Ok(id)
    }

    async fn find_by_key(&self, key: &UserKey) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE key = $1"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRecord::try_from).transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRecord::try_from).transpose()
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn update_by_key(&self, key: &UserKey, changes: &UserChanges) -> Result<u64, StoreError> {
        let patch = &changes.profile;
        let (email_changed, email) = match &patch.email {
            Some(email) => (true, email.clone()),
            None => (false, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                surname = COALESCE($3, surname),
                patronymic = COALESCE($4, patronymic),
                phone = COALESCE($5, phone),
                email = CASE WHEN $6 THEN $7 ELSE email END,
                address = COALESCE($8, address),
                photos = COALESCE($9, photos),
                videos = COALESCE($10, videos),
                update_time = $11
            WHERE key = $1
            "#,
        )
        .bind(key.as_str())
        .bind(&patch.name)
        .bind(&patch.surname)
        .bind(&patch.patronymic)
        .bind(&patch.phone)
        .bind(email_changed)
        .bind(email)
        .bind(&patch.address)
        .bind(changes.photos.as_deref().map(encode_media))
        .bind(changes.videos.as_deref().map(encode_media))
        .bind(changes.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn delete_by_key(&self, key: &UserKey) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn row(photos: &str) -> UserRow {
        UserRow {
            id: 7,
            key: "abc".to_string(),
            name: "Ann".to_string(),
            surname: "Lee".to_string(),
            patronymic: "M".to_string(),
            phone: "1234567890".to_string(),
            email: None,
            address: "20+ char address line here".to_string(),
            photos: photos.to_string(),
            videos: "[]".to_string(),
            create_time: Utc::now(),
            update_time: Utc::now(),
        }
    }

    #[test]
    fn test_media_columns_keep_order() {
        let files = vec!["b.png".to_string(), "a.png".to_string()];
        let encoded = encode_media(&files);
        assert_eq!(encoded, r#"["b.png","a.png"]"#);
        assert_eq!(decode_media(&encoded).unwrap(), files);
    }

    #[test]
    fn test_null_media_column_decodes_empty() {
        assert!(decode_media("null").unwrap().is_empty());
        assert!(decode_media("").unwrap().is_empty());
    }

    #[test]
    fn test_row_conversion() {
        let record = UserRecord::try_from(row(r#"["x.png"]"#)).unwrap();
        assert_eq!(record.key.as_str(), "abc");
        assert_eq!(record.photos, vec!["x.png".to_string()]);
        assert!(record.videos.is_empty());
    }

    #[test]
    fn test_malformed_media_column() {
        let err = UserRecord::try_from(row("not json")).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { id: 7, .. }));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = UserRecord::try_from(row("[]")).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("createTime").is_some());
        assert_eq!(json["key"], "abc");
    }
}
