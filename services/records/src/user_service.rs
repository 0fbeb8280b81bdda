use crate::error::{LifecycleError, Stage};
use crate::key_generator::{KeyGenerator, UserKey};
use crate::media::{Category, MediaBatch, MediaIngestor};
use crate::provisioner::{ProvisionError, StorageProvisioner};
use crate::user_store::{
    NewUser, Profile, ProfilePatch, StoreError, UserChanges, UserRecord, UserStore,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of a successful create
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedUser {
    pub id: i64,
    pub key: UserKey,
}

/// Result of a successful update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdatedUser {
    pub key: UserKey,
}

/// Stored names of the files ingested for one operation
#[derive(Debug, Default)]
struct IngestedMedia {
    photos: Option<Vec<String>>,
    videos: Option<Vec<String>>,
}

impl IngestedMedia {
    fn get(&self, category: Category) -> Option<&Vec<String>> {
        match category {
            Category::Photos => self.photos.as_ref(),
            Category::Videos => self.videos.as_ref(),
        }
    }

    fn set(&mut self, category: Category, stored: Vec<String>) {
        match category {
            Category::Photos => self.photos = Some(stored),
            Category::Videos => self.videos = Some(stored),
        }
    }
}

/// Keeps user rows and their storage trees consistent across
/// create, update and delete.
pub struct UserLifecycleService {
    keys: Arc<dyn KeyGenerator>,
    provisioner: StorageProvisioner,
    ingestor: MediaIngestor,
    store: Arc<dyn UserStore>,
    key_attempts: u32,
}

impl UserLifecycleService {
    pub fn new(
        keys: Arc<dyn KeyGenerator>,
        provisioner: StorageProvisioner,
        ingestor: MediaIngestor,
        store: Arc<dyn UserStore>,
        key_attempts: u32,
    ) -> Self {
        Self {
            keys,
            provisioner,
            ingestor,
            store,
            key_attempts: key_attempts.max(1),
        }
    }

    /// Mint a key, provision its storage, ingest the uploads and insert the row.
    ///
    /// A key whose directory already exists, or that the store rejects as a
    /// duplicate, is discarded and a fresh one tried, up to `key_attempts`
    /// times.
    #[instrument(skip_all, fields(photos = photos.len(), videos = videos.len()))]
    pub async fn create_user(
        &self,
        profile: Profile,
        photos: MediaBatch,
        videos: MediaBatch,
    ) -> Result<CreatedUser, LifecycleError> {
        for attempt in 1..=self.key_attempts {
            let key = self.keys.new_key();

            match self.provisioner.provision(&key).await {
                Ok(()) => {}
                Err(ProvisionError::AlreadyExists(_)) => {
                    warn!(key = %key, attempt, "Generated key already has storage, retrying");
                    metrics::counter!("records.users.key_collisions").increment(1);
                    continue;
                }
                Err(e @ ProvisionError::Access { .. }) => return Err(LifecycleError::Access(e)),
                Err(e @ ProvisionError::Incomplete { .. }) => {
                    return Err(LifecycleError::partial(Stage::Provision, e));
                }
            }

            let media = match self.ingest_all(&key, &photos, &videos).await {
                Ok(media) => media,
                Err(e) => {
                    self.provisioner.deprovision(&key).await;
                    return Err(e);
                }
            };

            let new_user = NewUser {
                key: key.clone(),
                profile: profile.clone(),
                photos: media.photos.unwrap_or_default(),
                videos: media.videos.unwrap_or_default(),
                created_at: Utc::now(),
            };

            match self.store.insert(&new_user).await {
                Ok(id) => {
                    info!(id, key = %key, "User created");
                    metrics::counter!("records.users.created").increment(1);
                    return Ok(CreatedUser { id, key });
                }
                Err(StoreError::DuplicateKey(_)) => {
                    warn!(key = %key, attempt, "Generated key already stored, retrying");
                    metrics::counter!("records.users.key_collisions").increment(1);
                    self.provisioner.deprovision(&key).await;
                }
                Err(e) => {
                    self.provisioner.deprovision(&key).await;
                    return Err(LifecycleError::Persistence(e));
                }
            }
        }

        Err(LifecycleError::AlreadyExists {
            attempts: self.key_attempts,
        })
    }

    /// Apply a profile patch and replace the media list of every category
    /// for which files are supplied. Categories without files keep their list.
    #[instrument(skip_all, fields(key = %key, photos = photos.len(), videos = videos.len()))]
    pub async fn update_user_by_key(
        &self,
        key: &UserKey,
        patch: ProfilePatch,
        photos: MediaBatch,
        videos: MediaBatch,
    ) -> Result<UpdatedUser, LifecycleError> {
        let existing = self
            .store
            .find_by_key(key)
            .await?
            .ok_or_else(|| LifecycleError::not_found(format!("User with key {key}")))?;

        let media = self.ingest_all(key, &photos, &videos).await?;

        let changes = UserChanges {
            profile: patch,
            photos: media.photos.clone(),
            videos: media.videos.clone(),
            updated_at: Utc::now(),
        };

        let affected = match self.store.update_by_key(key, &changes).await {
            Ok(affected) => affected,
            Err(e) => {
                self.discard(key, &media).await;
                return Err(LifecycleError::Persistence(e));
            }
        };

        if affected == 0 {
            self.discard(key, &media).await;
            return Err(LifecycleError::not_found(format!("User with key {key}")));
        }

        // Replaced files are no longer referenced by the row
        for category in Category::ALL {
            if media.get(category).is_some() {
                let previous = match category {
                    Category::Photos => &existing.photos,
                    Category::Videos => &existing.videos,
                };
                self.ingestor.remove(key, category, previous).await;
            }
        }

        info!(key = %key, "User updated");
        metrics::counter!("records.users.updated").increment(1);
        Ok(UpdatedUser { key: key.clone() })
    }

    /// Remove the storage tree, then the row. Storage removal never blocks
    /// the row deletion.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete_user_by_key(&self, key: &UserKey) -> Result<(), LifecycleError> {
        self.provisioner.deprovision(key).await;

        let affected = self.store.delete_by_key(key).await?;
        if affected == 0 {
            return Err(LifecycleError::not_found(format!("User with key {key}")));
        }

        info!(key = %key, "User deleted");
        metrics::counter!("records.users.deleted").increment(1);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_user_by_id(&self, id: i64) -> Result<UserKey, LifecycleError> {
        let user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found(format!("User with id {id}")))?;

        self.delete_user_by_key(&user.key).await?;
        Ok(user.key)
    }

    pub async fn get_user_by_key(&self, key: &UserKey) -> Result<UserRecord, LifecycleError> {
        self.store
            .find_by_key(key)
            .await?
            .ok_or_else(|| LifecycleError::not_found(format!("User with key {key}")))
    }

    /// Lookup by a raw, client supplied key. A malformed key cannot match
    /// any record and is reported as not found.
    pub async fn get_user_by_composite_key(&self, raw: &str) -> Result<UserRecord, LifecycleError> {
        match UserKey::parse(raw) {
            Ok(key) => self.get_user_by_key(&key).await,
            Err(e) => {
                debug!(error = %e, "Malformed user key");
                Err(LifecycleError::not_found("User"))
            }
        }
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, LifecycleError> {
        Ok(self.store.list().await?)
    }

    /// Ingest photos then videos. On failure every file written by this call
    /// is removed again before the error is returned.
    async fn ingest_all(
        &self,
        key: &UserKey,
        photos: &MediaBatch,
        videos: &MediaBatch,
    ) -> Result<IngestedMedia, LifecycleError> {
        let mut media = IngestedMedia::default();

        for (category, batch) in [(Category::Photos, photos), (Category::Videos, videos)] {
            if batch.is_empty() {
                continue;
            }
            match self.ingestor.ingest(key, category, batch).await {
                Ok(stored) => media.set(category, stored),
                Err(e) => {
                    warn!(
                        error = %e,
                        key = %key,
                        stored_before_failure = e.stored.len(),
                        "Media ingestion aborted"
                    );
                    self.ingestor.remove(key, category, &e.stored).await;
                    self.discard(key, &media).await;
                    return Err(LifecycleError::partial(Stage::Ingest, e));
                }
            }
        }

        Ok(media)
    }

    async fn discard(&self, key: &UserKey, media: &IngestedMedia) {
        for category in Category::ALL {
            if let Some(stored) = media.get(category) {
                self.ingestor.remove(key, category, stored).await;
            }
        }
    }
}
