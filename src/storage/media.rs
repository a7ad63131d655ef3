//! Content-addressed media storage
//!
//! Images referenced by articles are stored under keys derived from their
//! bytes, so uploading the same image twice writes nothing new:
//!
//! ```text
//! {prefix}/{source}/{YYYY}/{MM}/{DD}/{sha256[..16]}.{ext}
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::scheduler::resources::Resource;
use crate::utils::error::StoreError;
use crate::utils::{sanitize_filename, sha256_hex};

/// Hex characters of the digest used in object names
const DIGEST_PREFIX_LEN: usize = 16;

/// Image formats accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageType {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }

    /// Match a `Content-Type` value, ignoring parameters
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Detect an image format from magic bytes
///
/// Servers frequently answer image URLs with HTML error pages and a 200
/// status; those return `None`.
pub fn sniff_image_type(bytes: &[u8]) -> Option<ImageType> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageType::Jpeg)
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(ImageType::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageType::Gif)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageType::Webp)
    } else {
        None
    }
}

/// Object key for `bytes` published by `source` on `date`
pub fn media_key(
    prefix: &str,
    source: &str,
    date: DateTime<Utc>,
    bytes: &[u8],
    image_type: ImageType,
) -> String {
    let digest = sha256_hex(bytes);
    format!(
        "{}/{}/{:04}/{:02}/{:02}/{}.{}",
        prefix.trim_matches('/'),
        sanitize_filename(source),
        date.year(),
        date.month(),
        date.day(),
        &digest[..DIGEST_PREFIX_LEN],
        image_type.extension()
    )
}

/// Blob storage for media assets
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`; storing an existing key is a no-op
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// [`ObjectStore`] rooted in a local directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(root);
        fs::create_dir_all(&store.root).await?;
        tracing::info!(root = %store.root.display(), "Media store initialized");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map `key` to a path below the root, rejecting traversal
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let is_safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !is_safe {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        if fs::try_exists(&path).await? {
            tracing::debug!(key = key, "Object already stored");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp file first so readers never see partial objects
        let temp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            key = key,
            content_type = content_type,
            size = bytes.len(),
            "Object stored"
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }
}

#[async_trait]
impl Resource for FsObjectStore {
    fn name(&self) -> &str {
        "media-store"
    }

    async fn close(&self) -> anyhow::Result<()> {
        // Every write is flushed before `put` returns
        Ok(())
    }
}

/// In-memory [`ObjectStore`] for tests
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored bytes and content type for `key`
    pub fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.read().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().map_err(|_| StoreError::LockPoisoned)?;
        objects
            .entry(key.to_string())
            .or_insert_with(|| (bytes, content_type.to_string()));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let objects = self.objects.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(objects.contains_key(key))
    }
}
