use crate::key_generator::UserKey;
use crate::provisioner::StorageLayout;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Media-type scoped subdirectory of a user's storage area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Photos,
    Videos,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Photos, Category::Videos];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Photos => "photos",
            Category::Videos => "videos",
        }
    }

    /// Match a multipart field name (`photos`, `photos[]`, ...)
    pub fn from_field_name(name: &str) -> Option<Self> {
        match name.trim_end_matches("[]") {
            "photos" => Some(Category::Photos),
            "videos" => Some(Category::Videos),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A file received from a client, held in memory until ingested
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client supplied name; only its extension is kept
    pub file_name: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Ordered sequence of uploads for one category.
///
/// Callers holding a single file convert it with `From<UploadedFile>`; the
/// ingestor only ever sees a sequence.
#[derive(Debug, Clone, Default)]
pub struct MediaBatch(Vec<UploadedFile>);

impl MediaBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, file: UploadedFile) {
        self.0.push(file);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadedFile> {
        self.0.iter()
    }
}

impl From<UploadedFile> for MediaBatch {
    fn from(file: UploadedFile) -> Self {
        Self(vec![file])
    }
}

impl From<Vec<UploadedFile>> for MediaBatch {
    fn from(files: Vec<UploadedFile>) -> Self {
        Self(files)
    }
}

impl FromIterator<UploadedFile> for MediaBatch {
    fn from_iter<I: IntoIterator<Item = UploadedFile>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A batch was aborted part way through
#[derive(Debug, Error)]
#[error("failed to store {file_name} into {category} after {} file(s): {source}", .stored.len())]
pub struct IngestError {
    pub category: Category,
    /// Client name of the file that failed
    pub file_name: String,
    /// Stored names written before the failure, in upload order
    pub stored: Vec<String>,
    #[source]
    pub source: io::Error,
}

/// Writes uploads into a provisioned category directory under fresh names
#[derive(Debug, Clone)]
pub struct MediaIngestor {
    layout: StorageLayout,
}

impl MediaIngestor {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Store every file of `batch` and return the stored names in order.
    ///
    /// Aborts on the first write failure. Files written before it stay on
    /// disk and are listed in [`IngestError::stored`].
    #[instrument(skip_all, fields(key = %key, category = %category, files = batch.len()))]
    pub async fn ingest(
        &self,
        key: &UserKey,
        category: Category,
        batch: &MediaBatch,
    ) -> Result<Vec<String>, IngestError> {
        let mut stored = Vec::with_capacity(batch.len());

        for file in batch.iter() {
            let stored_name = stored_file_name(&file.file_name);
            let path = self.layout.file_path(key, category, &stored_name);

            if let Err(source) = write_new_file(&path, &file.data).await {
                return Err(IngestError {
                    category,
                    file_name: file.file_name.clone(),
                    stored,
                    source,
                });
            }

            debug!(
                original = %file.file_name,
                stored = %stored_name,
                size_bytes = file.data.len(),
                "Media file stored"
            );
            metrics::counter!("records.media.ingested", "category" => category.dir_name())
                .increment(1);
            stored.push(stored_name);
        }

        Ok(stored)
    }

    /// Best-effort removal of stored files; missing files are ignored
    pub async fn remove(&self, key: &UserKey, category: Category, stored: &[String]) {
        let removals = stored.iter().map(|name| {
            let path = self.layout.file_path(key, category, name);
            async move {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "Failed to remove media file");
                    }
                }
            }
        });

        futures::future::join_all(removals).await;
    }
}

/// `<random token>.<extension of the client name>`
///
/// The extension is lowercased. One that is missing, longer than 16 bytes or
/// not ASCII alphanumeric is replaced by `bin`.
pub fn stored_file_name(original: &str) -> String {
    format!("{}.{}", Uuid::new_v4().simple(), file_extension(original))
}

fn file_extension(original: &str) -> String {
    Path::new(original)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 16)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

async fn write_new_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let written = async {
        file.write_all(data).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(cleanup) = tokio::fs::remove_file(path).await {
            warn!(error = %cleanup, path = %path.display(), "Failed to remove partial media file");
        }
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::StorageProvisioner;
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, StorageLayout, UserKey) {
        let tmp = TempDir::new().unwrap();
        let layout = StorageLayout::new(tmp.path().join("users"));
        let provisioner = StorageProvisioner::new(layout.clone());
        provisioner.ensure_root().await.unwrap();
        let key = UserKey::parse("owner").unwrap();
        provisioner.provision(&key).await.unwrap();
        (tmp, layout, key)
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a.png"), "png");
        assert_eq!(file_extension("clip.final.MP4"), "mp4");
        assert_eq!(file_extension("noext"), "bin");
        assert_eq!(file_extension("weird.p/ng"), "bin");
        assert_eq!(file_extension(".hidden"), "bin");
    }

    #[test]
    fn test_same_name_gets_distinct_stored_names() {
        assert_ne!(stored_file_name("a.png"), stored_file_name("a.png"));
    }

    #[test]
    fn test_stored_name_normalizes_extension() {
        let stored = stored_file_name("Clip.MOV");
        let (token, ext) = stored.split_once('.').unwrap();
        assert_eq!(ext, "mov");
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        assert!(stored_file_name("../../etc/passwd").ends_with(".bin"));
    }

    #[test]
    fn test_category_field_names() {
        assert_eq!(Category::from_field_name("photos"), Some(Category::Photos));
        assert_eq!(Category::from_field_name("videos[]"), Some(Category::Videos));
        assert_eq!(Category::from_field_name("name"), None);
    }

    #[test]
    fn test_single_file_normalizes_to_batch() {
        let batch = MediaBatch::from(UploadedFile::new("a.png", vec![1u8]));
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_writes_each_file_in_order() {
        let (_tmp, layout, key) = setup().await;
        let ingestor = MediaIngestor::new(layout.clone());
        let batch: MediaBatch = vec![
            UploadedFile::new("one.png", b"1".to_vec()),
            UploadedFile::new("two.jpg", b"22".to_vec()),
            UploadedFile::new("one.png", b"333".to_vec()),
        ]
        .into();

        let stored = ingestor.ingest(&key, Category::Photos, &batch).await.unwrap();

        assert_eq!(stored.len(), 3);
        assert!(stored[0].ends_with(".png"));
        assert!(stored[1].ends_with(".jpg"));
        assert_eq!(stored.iter().collect::<HashSet<_>>().len(), 3);

        let sizes: Vec<usize> = stored
            .iter()
            .map(|name| {
                std::fs::read(layout.file_path(&key, Category::Photos, name))
                    .unwrap()
                    .len()
            })
            .collect();
        assert_eq!(sizes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_an_error() {
        let (_tmp, layout, key) = setup().await;
        let ingestor = MediaIngestor::new(layout);

        let stored = ingestor
            .ingest(&key, Category::Videos, &MediaBatch::empty())
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_missing_category_dir_aborts_batch() {
        let (_tmp, layout, key) = setup().await;
        std::fs::remove_dir_all(layout.category_dir(&key, Category::Videos)).unwrap();
        let ingestor = MediaIngestor::new(layout);
        let batch = MediaBatch::from(UploadedFile::new("v.mp4", b"v".to_vec()));

        let err = ingestor.ingest(&key, Category::Videos, &batch).await.unwrap_err();
        assert_eq!(err.file_name, "v.mp4");
        assert!(err.stored.is_empty());
    }

    #[tokio::test]
    async fn test_remove_ignores_missing_files() {
        let (_tmp, layout, key) = setup().await;
        let ingestor = MediaIngestor::new(layout.clone());
        let batch = MediaBatch::from(UploadedFile::new("a.png", b"a".to_vec()));
        let mut stored = ingestor.ingest(&key, Category::Photos, &batch).await.unwrap();
        stored.push("gone.png".to_string());

        ingestor.remove(&key, Category::Photos, &stored).await;

        let left = std::fs::read_dir(layout.category_dir(&key, Category::Photos))
            .unwrap()
            .count();
        assert_eq!(left, 0);
    }
}
