use crate::user_store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

/// Contact request fields, already validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub text: String,
}

/// Stored contact request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: i64,
    pub create_time: DateTime<Utc>,
    pub name: String,
    pub surname: String,
    pub patronymic: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub text: String,
}

/// Append-only access to the `requests` relation
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn insert(&self, request: &NewRequest, created_at: DateTime<Utc>)
        -> Result<i64, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<RequestRecord>, StoreError>;
}

/// PostgreSQL-backed request log
#[derive(Debug, Clone)]
pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn insert(
        &self,
        request: &NewRequest,
        created_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO requests (
                create_time, name, surname, patronymic, phone, email, text
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7
            )
            RETURNING id
            "#,
        )
        .bind(created_at)
        .bind(&request.name)
        .bind(&request.surname)
        .bind(&request.patronymic)
        .bind(&request.phone)
        .bind(&request.email)
        .bind(&request.text)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<RequestRecord>, StoreError> {
        let record = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, create_time, name, surname, patronymic, phone, email, text
            FROM requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}
