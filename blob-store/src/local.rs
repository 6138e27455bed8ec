use std::fs;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{Download, ListPage, ListRequest, ObjectEntry, ObjectStore};

/// Treats a directory on disk as a container. Object names are the
/// `/`-separated paths of regular files relative to the root.
///
/// The filesystem keeps no tombstones, so a removed file simply stops
/// appearing in listings.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if name.is_empty() || escapes {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn check_container(&self) -> Result<(), StoreError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(err) => Err(StoreError::Unavailable(format!(
                "cannot access {}: {}",
                self.root.display(),
                err
            ))),
        }
    }

    async fn list_page(&self, request: ListRequest) -> Result<ListPage, StoreError> {
        if request.page_size == 0 {
            return Err(StoreError::InvalidRequest(
                "page size must be at least 1".to_string(),
            ));
        }
        let root = self.root.clone();
        let mut entries = tokio::task::spawn_blocking(move || scan_dir(&root))
            .await
            .map_err(|err| StoreError::Unavailable(format!("directory scan aborted: {err}")))??;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let start = match &request.cursor {
            Some(cursor) => entries.partition_point(|entry| entry.name.as_str() <= cursor.as_str()),
            None => 0,
        };
        let total = entries.len();
        let end = start.saturating_add(request.page_size as usize).min(total);
        let items: Vec<ObjectEntry> = entries.drain(start..end).collect();
        let next_cursor = if end < total {
            items.last().map(|entry| entry.name.clone())
        } else {
            None
        };

        Ok(ListPage { items, next_cursor })
    }

    async fn download(&self, name: &str) -> Result<Download, StoreError> {
        let path = self.resolve(name)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Download::new(Some(guess_content_type(name).to_string()), file))
    }
}

fn scan_dir(root: &Path) -> Result<Vec<ObjectEntry>, StoreError> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = object_name(root, &path) else {
                warn!(path = %path.display(), "skipping file with non UTF-8 name");
                continue;
            };
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Raced with a concurrent removal.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            let last_modified: DateTime<Utc> = meta.modified()?.into();
            let created_at = meta
                .created()
                .map(DateTime::<Utc>::from)
                .unwrap_or(last_modified);
            out.push(ObjectEntry {
                content_type: Some(guess_content_type(&name).to_string()),
                name,
                last_modified,
                created_at,
                deleted: false,
            });
        }
    }
    debug!(root = %root.display(), files = out.len(), "scanned directory");
    Ok(out)
}

fn object_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

fn guess_content_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_common_content_types() {
        assert_eq!(guess_content_type("a.TXT"), "text/plain");
        assert_eq!(guess_content_type("dir/data.json"), "application/json");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn rejects_names_escaping_the_root() {
        let store = LocalDirStore::new("/tmp/container");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("").is_err());
        assert_eq!(
            store.resolve("a/b.txt").unwrap(),
            PathBuf::from("/tmp/container/a/b.txt")
        );
    }
}
