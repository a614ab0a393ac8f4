//! Bucket storage: one directory per bucket, one file per object.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{validate_name, StorageError};

/// Directory-backed bucket store rooted at `root`.
///
/// Each call is a handful of filesystem operations; buckets are created with
/// a single `mkdir`, so two concurrent creates cannot both succeed.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a store under `root`. The directory is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty bucket.
    ///
    /// # Errors
    /// [`StorageError::ContainerExists`] if the bucket exists,
    /// [`StorageError::InvalidName`] for a bad name, [`StorageError::Io`]
    /// otherwise.
    pub async fn create_container(&self, container: &str) -> Result<(), StorageError> {
        validate_name("bucket", container)?;
        tokio::fs::create_dir_all(&self.root).await?;
        match tokio::fs::create_dir(self.root.join(container)).await {
            Ok(()) => {
                tracing::info!(bucket = container, "bucket created");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                Err(StorageError::ContainerExists(container.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write `content` as `name` inside `container`, replacing any previous
    /// object of that name.
    ///
    /// # Errors
    /// [`StorageError::ContainerNotFound`] if the bucket is missing,
    /// [`StorageError::InvalidName`] for a bad name, [`StorageError::Io`]
    /// otherwise.
    pub async fn put_blob(
        &self,
        container: &str,
        name: &str,
        content: &[u8],
    ) -> Result<(), StorageError> {
        validate_name("bucket", container)?;
        validate_name("file", name)?;
        let dir = self.container_dir(container).await?;
        tokio::fs::write(dir.join(name), content).await?;
        tracing::info!(bucket = container, file = name, bytes = content.len(), "file uploaded");
        Ok(())
    }

    /// Read an object back.
    ///
    /// # Errors
    /// [`StorageError::BlobNotFound`] if the object is missing,
    /// [`StorageError::ContainerNotFound`] if the bucket is.
    pub async fn get_blob(&self, container: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        validate_name("bucket", container)?;
        validate_name("file", name)?;
        let dir = self.container_dir(container).await?;
        tokio::fs::read(dir.join(name)).await.map_err(|e| blob_error(e, container, name))
    }

    /// Remove one object.
    ///
    /// # Errors
    /// [`StorageError::BlobNotFound`] if the object or its bucket is missing.
    pub async fn delete_blob(&self, container: &str, name: &str) -> Result<(), StorageError> {
        validate_name("bucket", container)?;
        validate_name("file", name)?;
        tokio::fs::remove_file(self.root.join(container).join(name))
            .await
            .map_err(|e| blob_error(e, container, name))?;
        tracing::info!(bucket = container, file = name, "file deleted");
        Ok(())
    }

    /// Remove an empty bucket.
    ///
    /// # Errors
    /// [`StorageError::ContainerNotFound`] if the bucket is missing and
    /// [`StorageError::ContainerNotEmpty`] if it still holds objects.
    pub async fn delete_container(&self, container: &str) -> Result<(), StorageError> {
        validate_name("bucket", container)?;
        let dir = self.container_dir(container).await?;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        if entries.next_entry().await?.is_some() {
            return Err(StorageError::ContainerNotEmpty(container.to_owned()));
        }
        tokio::fs::remove_dir(&dir).await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound => StorageError::ContainerNotFound(container.to_owned()),
            _ => StorageError::Io(e),
        })?;
        tracing::info!(bucket = container, "bucket deleted");
        Ok(())
    }

    async fn container_dir(&self, container: &str) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(container);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::ContainerNotFound(container.to_owned())),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(StorageError::ContainerNotFound(container.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn blob_error(e: std::io::Error, container: &str, name: &str) -> StorageError {
    if e.kind() == IoErrorKind::NotFound {
        StorageError::BlobNotFound { container: container.to_owned(), name: name.to_owned() }
    } else {
        StorageError::Io(e)
    }
}
