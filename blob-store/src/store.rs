use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::StoreError;

/// A single listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set when the backend reports a tombstone for a deleted object.
    pub deleted: bool,
    pub content_type: Option<String>,
}

/// Parameters for one page of a flat listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Opaque continuation token from the previous page; `None` starts at the beginning.
    pub cursor: Option<String>,
    pub page_size: u32,
    pub include_deleted: bool,
}

impl ListRequest {
    pub fn first(page_size: u32, include_deleted: bool) -> Self {
        Self {
            cursor: None,
            page_size,
            include_deleted,
        }
    }
}

/// One page of a flat listing. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub items: Vec<ObjectEntry>,
    pub next_cursor: Option<String>,
}

/// An object body being downloaded.
pub struct Download {
    pub content_type: Option<String>,
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl Download {
    pub fn new(content_type: Option<String>, body: impl AsyncRead + Send + 'static) -> Self {
        Self {
            content_type,
            body: Box::pin(body),
        }
    }

    /// Drains the body into memory.
    pub async fn read_all(mut self) -> Result<Vec<u8>, StoreError> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// The narrow surface the stream core needs from an object container.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Verifies that the container exists and is reachable.
    async fn check_container(&self) -> Result<(), StoreError>;

    /// Returns one page of the container listing in lexical name order.
    async fn list_page(&self, request: ListRequest) -> Result<ListPage, StoreError>;

    /// Opens the body of a live object.
    async fn download(&self, name: &str) -> Result<Download, StoreError>;
}
