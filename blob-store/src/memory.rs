use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{Download, ListPage, ListRequest, ObjectEntry, ObjectStore};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    clock: Option<DateTime<Utc>>,
    unavailable: bool,
    fail_next_list: Option<String>,
    fail_next_download: Option<String>,
}

impl Inner {
    /// Wall-clock time, bumped so that every mutation gets a distinct timestamp.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

/// An in-process container. Clones share the same contents.
///
/// Deleting an object leaves a tombstone that only shows up in listings that
/// ask for deleted entries, which is how change detection learns about deletes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or overwrites an object, returning its new last-modified time.
    pub fn put(&self, name: &str, body: impl Into<Vec<u8>>, content_type: &str) -> DateTime<Utc> {
        let mut inner = self.lock();
        let now = inner.tick();
        let created_at = match inner.objects.get(name) {
            Some(existing) if !existing.deleted => existing.created_at,
            _ => now,
        };
        inner.objects.insert(
            name.to_string(),
            StoredObject {
                body: body.into(),
                content_type: content_type.to_string(),
                created_at,
                last_modified: now,
                deleted: false,
            },
        );
        debug!(object = name, last_modified = %now, "memory store put");
        now
    }

    /// Stores an object with explicit timestamps.
    pub fn put_at(
        &self,
        name: &str,
        body: impl Into<Vec<u8>>,
        content_type: &str,
        created_at: DateTime<Utc>,
        last_modified: DateTime<Utc>,
    ) {
        self.lock().objects.insert(
            name.to_string(),
            StoredObject {
                body: body.into(),
                content_type: content_type.to_string(),
                created_at,
                last_modified,
                deleted: false,
            },
        );
    }

    /// Replaces a live object with a tombstone. Returns the tombstone's
    /// timestamp, or `None` if there was nothing to delete.
    pub fn delete(&self, name: &str) -> Option<DateTime<Utc>> {
        let mut inner = self.lock();
        let live = inner.objects.get(name).is_some_and(|object| !object.deleted);
        if !live {
            return None;
        }
        let now = inner.tick();
        let object = inner.objects.get_mut(name)?;
        object.deleted = true;
        object.body.clear();
        object.last_modified = now;
        Some(now)
    }

    /// Makes `check_container` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// The next `list_page` call fails with the given message.
    pub fn fail_next_list(&self, message: &str) {
        self.lock().fail_next_list = Some(message.to_string());
    }

    /// The next `download` call fails with the given message.
    pub fn fail_next_download(&self, message: &str) {
        self.lock().fail_next_download = Some(message.to_string());
    }

    /// Number of live (non-deleted) objects.
    pub fn len(&self) -> usize {
        self.lock().objects.values().filter(|o| !o.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn check_container(&self) -> Result<(), StoreError> {
        if self.lock().unavailable {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    async fn list_page(&self, request: ListRequest) -> Result<ListPage, StoreError> {
        if request.page_size == 0 {
            return Err(StoreError::InvalidRequest(
                "page size must be at least 1".to_string(),
            ));
        }
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next_list.take() {
            return Err(StoreError::Unavailable(message));
        }

        let lower = match &request.cursor {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Unbounded,
        };
        let mut visible = inner
            .objects
            .range((lower, Bound::Unbounded))
            .filter(|(_, object)| request.include_deleted || !object.deleted);

        let mut items = Vec::new();
        for (name, object) in visible.by_ref().take(request.page_size as usize) {
            items.push(ObjectEntry {
                name: name.clone(),
                last_modified: object.last_modified,
                created_at: object.created_at,
                deleted: object.deleted,
                content_type: Some(object.content_type.clone()),
            });
        }
        let next_cursor = if visible.next().is_some() {
            items.last().map(|entry| entry.name.clone())
        } else {
            None
        };

        Ok(ListPage { items, next_cursor })
    }

    async fn download(&self, name: &str) -> Result<Download, StoreError> {
        let mut inner = self.lock();
        if let Some(message) = inner.fail_next_download.take() {
            return Err(StoreError::Unavailable(message));
        }
        match inner.objects.get(name) {
            Some(object) if !object.deleted => {
                let content_type = if object.content_type.is_empty() {
                    DEFAULT_CONTENT_TYPE.to_string()
                } else {
                    object.content_type.clone()
                };
                Ok(Download::new(
                    Some(content_type),
                    std::io::Cursor::new(object.body.clone()),
                ))
            }
            _ => Err(StoreError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_page(size: u32, include_deleted: bool) -> ListRequest {
        ListRequest::first(size, include_deleted)
    }

    #[tokio::test]
    async fn put_assigns_increasing_timestamps() {
        let store = MemoryStore::new();
        let a = store.put("a", "1", "text/plain");
        let b = store.put("b", "2", "text/plain");
        let a2 = store.put("a", "3", "text/plain");
        assert!(a < b);
        assert!(b < a2);

        let page = store.list_page(first_page(10, false)).await.unwrap();
        let entry = &page.items[0];
        assert_eq!(entry.name, "a");
        assert_eq!(entry.created_at, a);
        assert_eq!(entry.last_modified, a2);
    }

    #[tokio::test]
    async fn pages_follow_the_cursor() {
        let store = MemoryStore::new();
        for name in ["c", "a", "b"] {
            store.put(name, name, "text/plain");
        }

        let page = store.list_page(first_page(2, false)).await.unwrap();
        let names: Vec<_> = page.items.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(page.next_cursor.as_deref(), Some("b"));

        let page = store
            .list_page(ListRequest {
                cursor: page.next_cursor,
                page_size: 2,
                include_deleted: false,
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "c");
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn tombstones_only_listed_on_request() {
        let store = MemoryStore::new();
        store.put("gone", "x", "text/plain");
        let deleted_at = store.delete("gone").unwrap();
        assert!(store.delete("gone").is_none());
        assert!(store.is_empty());

        let page = store.list_page(first_page(10, false)).await.unwrap();
        assert!(page.items.is_empty());

        let page = store.list_page(first_page(10, true)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.items[0].deleted);
        assert_eq!(page.items[0].last_modified, deleted_at);

        let err = store.download("gone").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn failure_hooks_fire_once() {
        let store = MemoryStore::new();
        store.put("a", "1", "text/plain");
        store.fail_next_list("boom");
        assert!(store.list_page(first_page(1, false)).await.is_err());
        assert!(store.list_page(first_page(1, false)).await.is_ok());

        store.fail_next_download("boom");
        assert!(store.download("a").await.is_err());
        let body = store.download("a").await.unwrap().read_all().await.unwrap();
        assert_eq!(body, b"1");
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let store = MemoryStore::new();
        let err = store.list_page(first_page(0, false)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }
}
