//! Origin-plus-edges replication.
//!
//! Objects are written to the `origin` directory and copied to every edge.
//! Reads are served from one edge chosen by a location hint:
//! `edges[hint mod len]`, with the remainder taken non-negative.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{validate_name, StorageError};

/// Directory holding the authoritative copy of every object.
pub const ORIGIN_DIR: &str = "origin";

/// Edge servers used when none are configured.
pub const DEFAULT_EDGES: [&str; 3] = ["edge1", "edge2", "edge3"];

/// An object served from an edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeFetch {
    /// Edge the object was read from.
    pub edge: String,
    /// Object bytes.
    pub content: Vec<u8>,
}

/// Directory-backed origin with a fixed, ordered list of edges.
#[derive(Debug, Clone)]
pub struct EdgeCache {
    root: PathBuf,
    edges: Vec<String>,
}

impl EdgeCache {
    /// Cache under `root` with [`DEFAULT_EDGES`].
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            edges: DEFAULT_EDGES.iter().map(|&e| e.to_owned()).collect(),
        }
    }

    /// Cache under `root` with a custom edge list.
    ///
    /// # Errors
    /// [`StorageError::NoEdges`] for an empty list, [`StorageError::InvalidName`]
    /// if an edge name is not a plain path component or collides with the
    /// origin directory.
    pub fn with_edges<I, S>(root: impl Into<PathBuf>, edges: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let edges: Vec<String> = edges.into_iter().map(Into::into).collect();
        if edges.is_empty() {
            return Err(StorageError::NoEdges);
        }
        for edge in &edges {
            validate_name("edge", edge)?;
            if edge == ORIGIN_DIR {
                return Err(StorageError::InvalidName {
                    what: "edge",
                    name: edge.clone(),
                    reason: "reserved for the origin",
                });
            }
        }
        Ok(Self { root: root.into(), edges })
    }

    /// Root directory of the cache.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configured edges in selection order.
    #[must_use]
    pub fn edges(&self) -> &[String] {
        &self.edges
    }

    /// Edge serving location `hint`.
    #[must_use]
    pub fn select_edge(&self, hint: i64) -> &str {
        // The edge list is non-empty and far smaller than i64::MAX.
        let len = i64::try_from(self.edges.len()).unwrap_or(i64::MAX);
        let index = usize::try_from(hint.rem_euclid(len)).unwrap_or(0);
        &self.edges[index]
    }

    /// Write `name` to the origin and replicate it to every edge.
    ///
    /// Returns the number of edges holding the object.
    ///
    /// # Errors
    /// [`StorageError::InvalidName`] for a bad name, [`StorageError::Io`]
    /// if any write fails.
    pub async fn publish(&self, name: &str, content: &[u8]) -> Result<usize, StorageError> {
        validate_name("file", name)?;
        let origin = self.root.join(ORIGIN_DIR);
        tokio::fs::create_dir_all(&origin).await?;
        tokio::fs::write(origin.join(name), content).await?;
        tracing::info!(file = name, bytes = content.len(), "file uploaded to origin");
        self.replicate(name).await
    }

    /// Copy the origin's `name` to every edge, overwriting older copies.
    ///
    /// # Errors
    /// [`StorageError::ObjectNotFound`] if the origin has no such object.
    pub async fn replicate(&self, name: &str) -> Result<usize, StorageError> {
        validate_name("file", name)?;
        let source = self.root.join(ORIGIN_DIR).join(name);
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::ObjectNotFound(name.to_owned()));
        }
        for edge in &self.edges {
            let dir = self.root.join(edge);
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::copy(&source, dir.join(name)).await?;
        }
        tracing::info!(file = name, edges = self.edges.len(), "file replicated to edges");
        Ok(self.edges.len())
    }

    /// Serve `name` from the edge chosen by `hint`.
    ///
    /// # Errors
    /// [`StorageError::ObjectNotFound`] if that edge has no copy.
    pub async fn fetch(&self, name: &str, hint: i64) -> Result<EdgeFetch, StorageError> {
        validate_name("file", name)?;
        let edge = self.select_edge(hint);
        match tokio::fs::read(self.root.join(edge).join(name)).await {
            Ok(content) => {
                tracing::debug!(file = name, edge, hint, "served from edge");
                Ok(EdgeFetch { edge: edge.to_owned(), content })
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(name.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `name` from the origin and from every edge.
    ///
    /// # Errors
    /// [`StorageError::ObjectNotFound`] if the origin has no such object;
    /// edges are left untouched in that case.
    pub async fn retract(&self, name: &str) -> Result<(), StorageError> {
        validate_name("file", name)?;
        match tokio::fs::remove_file(self.root.join(ORIGIN_DIR).join(name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(name.to_owned()));
            }
            Err(e) => return Err(e.into()),
        }
        for edge in &self.edges {
            match tokio::fs::remove_file(self.root.join(edge).join(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == IoErrorKind::NotFound => {
                    tracing::debug!(file = name, edge = %edge, "edge held no copy");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(file = name, "file deleted from origin and all edges");
        Ok(())
    }
}
