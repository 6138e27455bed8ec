// ABOUTME: Page-by-page walk over a container listing
// ABOUTME: Hides the continuation cursor so producers just ask for the next page

use std::sync::Arc;

use blob_store::{ListRequest, ObjectEntry, ObjectStore, StoreError};

use crate::config::PageSize;

/// Flat listing walker. Each page is requested lazily; the walk ends after
/// the page that carries no continuation cursor.
pub(crate) struct ObjectLister {
    store: Arc<dyn ObjectStore>,
    page_size: PageSize,
    include_deleted: bool,
    cursor: Option<String>,
    exhausted: bool,
}

impl ObjectLister {
    pub fn new(store: Arc<dyn ObjectStore>, page_size: PageSize, include_deleted: bool) -> Self {
        Self {
            store,
            page_size,
            include_deleted,
            cursor: None,
            exhausted: false,
        }
    }

    /// Fetches the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectEntry>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .store
            .list_page(ListRequest {
                cursor: self.cursor.clone(),
                page_size: self.page_size.get(),
                include_deleted: self.include_deleted,
            })
            .await?;

        match page.next_cursor {
            Some(cursor) => self.cursor = Some(cursor),
            None => self.exhausted = true,
        }

        Ok(Some(page.items))
    }
}
