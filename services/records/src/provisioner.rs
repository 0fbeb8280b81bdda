use crate::key_generator::UserKey;
use crate::media::Category;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure to provision a key's storage area
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The users root is missing, not a directory or not writable
    #[error("storage root {path} is not accessible: {source}")]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key already owns a directory; it is never reused
    #[error("storage for key {0} already exists")]
    AlreadyExists(UserKey),

    /// A category directory could not be created. The key directory has
    /// been removed again unless `rolled_back` is false.
    #[error("failed to create {path}: {source}")]
    Incomplete {
        path: PathBuf,
        rolled_back: bool,
        #[source]
        source: io::Error,
    },
}

/// Paths of the per-key storage tree:
/// `<users_root>/<key>/{photos,videos}/<file>`
#[derive(Debug, Clone)]
pub struct StorageLayout {
    users_root: PathBuf,
}

impl StorageLayout {
    pub fn new(users_root: impl Into<PathBuf>) -> Self {
        Self {
            users_root: users_root.into(),
        }
    }

    pub fn users_root(&self) -> &Path {
        &self.users_root
    }

    pub fn user_dir(&self, key: &UserKey) -> PathBuf {
        self.users_root.join(key.as_str())
    }

    pub fn category_dir(&self, key: &UserKey, category: Category) -> PathBuf {
        self.user_dir(key).join(category.dir_name())
    }

    pub fn file_path(&self, key: &UserKey, category: Category, file_name: &str) -> PathBuf {
        self.category_dir(key, category).join(file_name)
    }
}

/// Creates and removes the on-disk storage area of a user key
#[derive(Debug, Clone)]
pub struct StorageProvisioner {
    layout: StorageLayout,
}

impl StorageProvisioner {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Create the users root if needed (`mkdir -p`), called once at startup
    pub async fn ensure_root(&self) -> Result<(), ProvisionError> {
        let root = self.layout.users_root();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| ProvisionError::Access {
                path: root.to_path_buf(),
                source,
            })?;

        info!(path = %root.display(), "User storage root ready");
        Ok(())
    }

    /// Create `<key>/photos` and `<key>/videos`.
    ///
    /// An existing key directory is reported as [`ProvisionError::AlreadyExists`]
    /// and left untouched, even if it is only half populated.
    pub async fn provision(&self, key: &UserKey) -> Result<(), ProvisionError> {
        let root = self.layout.users_root();
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|source| ProvisionError::Access {
                path: root.to_path_buf(),
                source,
            })?;
        if !metadata.is_dir() {
            return Err(ProvisionError::Access {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "not a directory"),
            });
        }

        let user_dir = self.layout.user_dir(key);
        match tokio::fs::create_dir(&user_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(key = %key, "User directory already exists");
                return Err(ProvisionError::AlreadyExists(key.clone()));
            }
            Err(source) => {
                return Err(ProvisionError::Access {
                    path: root.to_path_buf(),
                    source,
                });
            }
        }

        for category in Category::ALL {
            let dir = self.layout.category_dir(key, category);
            if let Err(source) = tokio::fs::create_dir(&dir).await {
                let rolled_back = match tokio::fs::remove_dir_all(&user_dir).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            error = %e,
                            path = %user_dir.display(),
                            "Failed to roll back partially provisioned user directory"
                        );
                        false
                    }
                };
                return Err(ProvisionError::Incomplete {
                    path: dir,
                    rolled_back,
                    source,
                });
            }
        }

        info!(key = %key, "User directory structure created");
        Ok(())
    }

    /// Remove the key's tree. Never fails: a missing tree is a no-op and
    /// removal errors are only logged.
    pub async fn deprovision(&self, key: &UserKey) {
        let user_dir = self.layout.user_dir(key);
        match tokio::fs::remove_dir_all(&user_dir).await {
            Ok(()) => info!(key = %key, "User directory structure deleted"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key = %key, "User directory does not exist");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    key = %key,
                    path = %user_dir.display(),
                    "Failed to delete user directory"
                );
                metrics::counter!("records.storage.cleanup_failures").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(raw: &str) -> UserKey {
        UserKey::parse(raw).unwrap()
    }

    fn provisioner(dir: &TempDir) -> StorageProvisioner {
        StorageProvisioner::new(StorageLayout::new(dir.path().join("users")))
    }

    #[tokio::test]
    async fn test_provision_creates_category_dirs() {
        let tmp = TempDir::new().unwrap();
        let provisioner = provisioner(&tmp);
        provisioner.ensure_root().await.unwrap();

        let k = key("k1");
        provisioner.provision(&k).await.unwrap();

        let layout = provisioner.layout();
        assert!(layout.category_dir(&k, Category::Photos).is_dir());
        assert!(layout.category_dir(&k, Category::Videos).is_dir());
    }

    #[tokio::test]
    async fn test_existing_directory_is_not_an_access_error() {
        let tmp = TempDir::new().unwrap();
        let provisioner = provisioner(&tmp);
        provisioner.ensure_root().await.unwrap();

        let k = key("k1");
        provisioner.provision(&k).await.unwrap();
        let marker = provisioner.layout().file_path(&k, Category::Photos, "keep.png");
        std::fs::write(&marker, b"x").unwrap();

        let err = provisioner.provision(&k).await.unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyExists(ref dup) if *dup == k));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_half_created_directory_counts_as_existing() {
        let tmp = TempDir::new().unwrap();
        let provisioner = provisioner(&tmp);
        provisioner.ensure_root().await.unwrap();

        let k = key("half");
        std::fs::create_dir(provisioner.layout().user_dir(&k)).unwrap();

        assert!(matches!(
            provisioner.provision(&k).await,
            Err(ProvisionError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_is_access_error() {
        let tmp = TempDir::new().unwrap();
        let provisioner = provisioner(&tmp);

        assert!(matches!(
            provisioner.provision(&key("k1")).await,
            Err(ProvisionError::Access { .. })
        ));
    }

    #[tokio::test]
    async fn test_root_that_is_a_file_is_access_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("users"), b"").unwrap();
        let provisioner = provisioner(&tmp);

        assert!(matches!(
            provisioner.provision(&key("k1")).await,
            Err(ProvisionError::Access { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_category_dir_rolls_back_user_dir() {
        // Linux rejects paths of PATH_MAX bytes or more. The root is sized so
        // the key directory still fits and its category directories do not.
        const PATH_MAX: usize = 4096;
        let tmp = TempDir::new().unwrap();
        let mut root = tmp.path().to_path_buf();
        while root.as_os_str().len() < PATH_MAX - 250 {
            root.push("d".repeat(200));
        }
        std::fs::create_dir_all(&root).unwrap();

        let provisioner = StorageProvisioner::new(StorageLayout::new(root.clone()));
        let k = key(&"k".repeat(PATH_MAX - 7 - root.as_os_str().len()));

        let err = provisioner.provision(&k).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Incomplete {
                rolled_back: true,
                ..
            }
        ));
        assert!(!provisioner.layout().user_dir(&k).exists());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_deprovision_removes_tree() {
        let tmp = TempDir::new().unwrap();
        let provisioner = provisioner(&tmp);
        provisioner.ensure_root().await.unwrap();

        let k = key("k1");
        provisioner.provision(&k).await.unwrap();
        std::fs::write(
            provisioner.layout().file_path(&k, Category::Videos, "a.mp4"),
            b"video",
        )
        .unwrap();

        provisioner.deprovision(&k).await;
        assert!(!provisioner.layout().user_dir(&k).exists());
    }

    #[tokio::test]
    async fn test_deprovision_missing_tree_is_noop() {
        let tmp = TempDir::new().unwrap();
        let provisioner = provisioner(&tmp);
        provisioner.ensure_root().await.unwrap();

        provisioner.deprovision(&key("never-created")).await;
        assert!(provisioner.layout().users_root().is_dir());
    }
}
