//! Error types for the storage crate.

use nimbus_core::ErrorKind;

/// Errors from bucket storage and edge replication.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The bucket does not exist.
    #[error("Bucket {0} does not exist!")]
    ContainerNotFound(String),

    /// `create_container` on an existing bucket.
    #[error("Bucket {0} already exists!")]
    ContainerExists(String),

    /// `delete_container` on a bucket that still holds files.
    #[error("Bucket {0} is not empty and cannot be deleted!")]
    ContainerNotEmpty(String),

    /// The file does not exist in the bucket.
    #[error("File {name} does not exist in {container}!")]
    BlobNotFound { container: String, name: String },

    /// The file is not present at the origin or the chosen edge.
    #[error("File {0} not found.")]
    ObjectNotFound(String),

    /// A bucket, file or edge name that cannot be used as a path component.
    #[error("invalid {what} name {name:?}: {reason}")]
    InvalidName {
        what: &'static str,
        name: String,
        reason: &'static str,
    },

    /// An edge cache needs at least one edge.
    #[error("edge server list is empty")]
    NoEdges,

    /// Underlying filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classification used at the request boundary.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContainerNotFound(_) | Self::BlobNotFound { .. } | Self::ObjectNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::ContainerExists(_) => ErrorKind::Conflict,
            Self::ContainerNotEmpty(_) => ErrorKind::NonEmpty,
            Self::InvalidName { .. } | Self::NoEdges => ErrorKind::InvalidInput,
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Reject names that would escape or alias their parent directory.
pub(crate) fn validate_name(what: &'static str, name: &str) -> Result<(), StorageError> {
    const MAX_LEN: usize = 255;

    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.len() > MAX_LEN {
        Some("longer than 255 bytes")
    } else if name == "." || name == ".." {
        Some("must not be a relative path component")
    } else if name.contains(['/', '\\']) {
        Some("must not contain path separators")
    } else if name.contains('\0') {
        Some("must not contain NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidName { what, name: name.to_owned(), reason }),
        None => Ok(()),
    }
}
