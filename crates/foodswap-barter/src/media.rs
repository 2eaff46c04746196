//! Filesystem-backed [`MediaStorage`] for item images.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use foodswap_shared::constants::ALLOWED_IMAGE_TYPES;

use crate::ports::{ImageUpload, MediaError, MediaStorage};

/// Verify that a resolved path stays within the media root.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, MediaError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .unwrap_or(target)
        .components()
    {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(MediaError::InvalidRef(target.display().to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(MediaError::InvalidRef(target.display().to_string()));
    }
    Ok(resolved)
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct FsMediaStore {
    base_path: PathBuf,
    public_base_url: String,
    max_size: usize,
}

impl FsMediaStore {
    pub async fn new(
        base_path: PathBuf,
        public_base_url: impl Into<String>,
        max_size: usize,
    ) -> Result<Self, MediaError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            MediaError::Storage(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn read(&self, object_ref: &str) -> Result<Vec<u8>, MediaError> {
        let path = self.object_path(object_ref)?;
        if !path.exists() {
            return Err(MediaError::NotFound(object_ref.to_string()));
        }
        fs::read(&path)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to read {object_ref}: {e}")))
    }

    /// Object refs are bare `<uuid>.<ext>` file names.
    fn object_path(&self, object_ref: &str) -> Result<PathBuf, MediaError> {
        if object_ref.is_empty()
            || object_ref.contains('/')
            || object_ref.contains('\\')
            || object_ref.contains("..")
        {
            return Err(MediaError::InvalidRef(object_ref.to_string()));
        }
        ensure_within(&self.base_path, &self.base_path.join(object_ref))
    }
}

#[async_trait]
impl MediaStorage for FsMediaStore {
    async fn upload(&self, image: ImageUpload) -> Result<String, MediaError> {
        if image.bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        if image.bytes.len() > self.max_size {
            return Err(MediaError::TooLarge {
                size: image.bytes.len(),
                max: self.max_size,
            });
        }
        let ext = match extension_for(&image.content_type) {
            Some(ext) if ALLOWED_IMAGE_TYPES.contains(&image.content_type.as_str()) => ext,
            _ => return Err(MediaError::UnsupportedType(image.content_type)),
        };

        let object_ref = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.object_path(&object_ref)?;

        fs::write(&path, &image.bytes)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to write {object_ref}: {e}")))?;

        debug!(object_ref = %object_ref, size = image.bytes.len(), "Stored image");
        Ok(object_ref)
    }

    async fn delete(&self, object_ref: &str) -> Result<(), MediaError> {
        let path = self.object_path(object_ref)?;

        if !path.exists() {
            return Err(MediaError::NotFound(object_ref.to_string()));
        }

        fs::remove_file(&path)
            .await
            .map_err(|e| MediaError::Storage(format!("Failed to delete {object_ref}: {e}")))?;

        debug!(object_ref = %object_ref, "Deleted image");
        Ok(())
    }

    fn public_url(&self, object_ref: &str) -> String {
        format!("{}/{}", self.public_base_url, object_ref)
    }
}
