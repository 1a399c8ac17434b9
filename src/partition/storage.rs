//! Object listing sources
//!
//! Listings are paginated: a page carries a continuation token until the
//! last page. Keys are returned in lexicographic order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Files per page served by `LocalObjectStore`
const LOCAL_PAGE_SIZE: usize = 1000;

/// One stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Something that can list objects under a prefix
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Fetch one page, starting after `token` when given
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage>;
}

fn page_from_sorted(
    mut objects: impl Iterator<Item = ObjectInfo>,
    page_size: usize,
) -> ListPage {
    let page: Vec<ObjectInfo> = objects.by_ref().take(page_size).collect();
    let next_token = match objects.next() {
        Some(_) => page.last().map(|o| o.key.clone()),
        None => None,
    };
    ListPage {
        objects: page,
        next_token,
    }
}

// ─────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────

/// Object sizes held in memory, for tests and dry runs
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, u64>>,
    page_size: usize,
    pages_served: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
            pages_served: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, key: impl Into<String>, size: u64) {
        self.objects.write().insert(key.into(), size);
    }

    /// Number of pages handed out so far
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

impl<K: Into<String>> FromIterator<(K, u64)> for MemoryObjectStore {
    fn from_iter<I: IntoIterator<Item = (K, u64)>>(iter: I) -> Self {
        let store = MemoryObjectStore::new(1000);
        for (key, size) in iter {
            store.insert(key, size);
        }
        store
    }
}

#[async_trait]
impl ObjectLister for MemoryObjectStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        self.pages_served.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read();
        let matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| token.map_or(true, |t| key.as_str() > t))
            .map(|(key, size)| ObjectInfo {
                key: key.clone(),
                size: *size,
            });
        Ok(page_from_sorted(matching, self.page_size))
    }
}

// ─────────────────────────────────────────────────────────────────
// Local filesystem store
// ─────────────────────────────────────────────────────────────────

/// Files under a root directory, keyed by their `/`-separated relative path
///
/// The tree is walked once per listing, when the first page is requested;
/// later pages are cut from that snapshot.
pub struct LocalObjectStore {
    root: PathBuf,
    page_size: usize,
    snapshot: Mutex<Option<Arc<Vec<ObjectInfo>>>>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: LOCAL_PAGE_SIZE,
            snapshot: Mutex::new(None),
        }
    }

    /// Walk the tree off the async runtime and sort it by key
    async fn scan(&self) -> Result<Arc<Vec<ObjectInfo>>> {
        let root = self.root.clone();
        let objects = tokio::task::spawn_blocking(move || -> Result<Vec<ObjectInfo>> {
            if !root.is_dir() {
                return Err(Error::IoRead {
                    path: root,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
                });
            }
            let mut objects = Vec::new();
            walk(&root, &root, &mut objects)?;
            objects.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(objects)
        })
        .await
        .map_err(|e| Error::Internal(format!("directory walk panicked: {}", e)))??;

        let objects = Arc::new(objects);
        *self.snapshot.lock() = Some(Arc::clone(&objects));
        Ok(objects)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<ObjectInfo>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::IoRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
        } else if file_type.is_file() {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(ObjectInfo {
                key,
                size: entry.metadata()?.len(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectLister for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        let cached = match token {
            Some(_) => self.snapshot.lock().clone(),
            None => None,
        };
        let objects = match cached {
            Some(objects) => objects,
            None => self.scan().await?,
        };

        let matching = objects
            .iter()
            .filter(|o| o.key.starts_with(prefix))
            .filter(|o| token.map_or(true, |t| o.key.as_str() > t))
            .cloned();
        Ok(page_from_sorted(matching, self.page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_paginates() {
        let store = MemoryObjectStore::new(2);
        for key in ["data/a", "data/b", "data/c", "other/x"] {
            store.insert(key, 10);
        }

        let first = store.list_page("data/", None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("data/b"));

        let second = store.list_page("data/", first.next_token.as_deref()).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "data/c");
        assert!(second.next_token.is_none());
        assert_eq!(store.pages_served(), 2);
    }

    #[tokio::test]
    async fn test_local_store_lists_nested_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("logs/2024")).unwrap();
        std::fs::write(dir.path().join("logs/2024/b.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("logs/a.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();

        let store = LocalObjectStore::new(dir.path());
        let page = store.list_page("logs/", None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["logs/2024/b.txt", "logs/a.txt"]);
        assert_eq!(page.objects[0].size, 5);
    }

    #[test]
    fn test_memory_store_from_iter() {
        let store: MemoryObjectStore = [("b", 2u64), ("a", 1u64)].into_iter().collect();
        let page = tokio_test::block_on(store.list_page("", None)).unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn test_local_store_rescans_on_new_listing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert_eq!(store.list_page("", None).await.unwrap().objects.len(), 1);

        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        let page = store.list_page("", None).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_local_store_missing_root() {
        let store = LocalObjectStore::new("/definitely/not/here");
        assert!(store.list_page("", None).await.is_err());
    }
}
