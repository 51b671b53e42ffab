//! The cache set a hierarchy of description trees shares.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::bitmap::BitmapCache;
use crate::collection::RemoteCollectionItems;

/// Identity of the application a tree was built by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub package: String,
    pub uid: i32,
}

impl ApplicationInfo {
    pub fn new(package: impl Into<String>, uid: i32) -> Self {
        Self {
            package: package.into(),
            uid,
        }
    }
}

/// Interns application identities so equal ones share one allocation.
#[derive(Debug, Default)]
pub struct AppInfoCache {
    entries: FxHashMap<(String, i32), Arc<ApplicationInfo>>,
}

impl AppInfoCache {
    pub fn intern(&mut self, info: &Arc<ApplicationInfo>) -> Arc<ApplicationInfo> {
        self.entries
            .entry((info.package.clone(), info.uid))
            .or_insert_with(|| info.clone())
            .clone()
    }

    pub fn get(&self, package: &str, uid: i32) -> Option<&Arc<ApplicationInfo>> {
        self.entries.get(&(package.to_string(), uid))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolved collection snapshots, keyed by request id and by source URI.
#[derive(Debug, Default)]
pub struct CollectionCache {
    id_to_uri: BTreeMap<i32, String>,
    uri_to_items: FxHashMap<String, Arc<RemoteCollectionItems>>,
}

impl CollectionCache {
    /// Registers `items` as the snapshot of `uri`, reachable through `id`.
    ///
    /// A URI already present keeps its first snapshot.
    pub fn add_mapping(&mut self, id: i32, uri: &str, items: Arc<RemoteCollectionItems>) {
        self.id_to_uri.insert(id, uri.to_string());
        self.uri_to_items.entry(uri.to_string()).or_insert(items);
    }

    pub fn items_for_id(&self, id: i32) -> Option<Arc<RemoteCollectionItems>> {
        let uri = self.id_to_uri.get(&id)?;
        self.uri_to_items.get(uri).cloned()
    }

    pub fn uri_for_id(&self, id: i32) -> Option<&str> {
        self.id_to_uri.get(&id).map(String::as_str)
    }

    /// Re-roots the item trees of `id` onto the caches behind `root`.
    pub fn set_hierarchy_root_for_id(&mut self, id: i32, root: &CacheHandle) {
        let Some(uri) = self.id_to_uri.get(&id) else {
            return;
        };
        if let Some(items) = self.uri_to_items.get_mut(uri) {
            Arc::make_mut(items).set_hierarchy_root(root);
        }
    }

    /// `(id, uri, items)` triples in id order.
    pub fn entries(&self) -> impl Iterator<Item = (i32, &str, &Arc<RemoteCollectionItems>)> + '_ {
        self.id_to_uri.iter().filter_map(|(&id, uri)| {
            self.uri_to_items
                .get(uri)
                .map(|items| (id, uri.as_str(), items))
        })
    }

    pub fn len(&self) -> usize {
        self.id_to_uri.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_uri.is_empty()
    }
}

/// Bitmaps, collections and application identities of one hierarchy.
#[derive(Debug, Default)]
pub struct CacheSet {
    pub bitmaps: BitmapCache,
    pub collections: CollectionCache,
    pub app_infos: AppInfoCache,
}

/// Reference from a tree to its hierarchy's [`CacheSet`].
///
/// The root owns the set; every other tree holds a weak back-reference so
/// nested trees never keep their root's caches alive.
#[derive(Debug, Clone)]
pub enum CacheHandle {
    Root(Arc<Mutex<CacheSet>>),
    Child(Weak<Mutex<CacheSet>>),
}

impl Default for CacheHandle {
    fn default() -> Self {
        Self::new_root()
    }
}

impl CacheHandle {
    pub fn new_root() -> Self {
        Self::Root(Arc::new(Mutex::new(CacheSet::default())))
    }

    pub(crate) fn from_set(set: CacheSet) -> Self {
        Self::Root(Arc::new(Mutex::new(set)))
    }

    /// A handle that refers to no caches; replaced once the tree is attached.
    pub(crate) fn detached() -> Self {
        Self::Child(Weak::new())
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root(_))
    }

    /// Non-owning handle to the same caches.
    pub fn downgrade(&self) -> Self {
        match self {
            Self::Root(set) => Self::Child(Arc::downgrade(set)),
            Self::Child(weak) => Self::Child(weak.clone()),
        }
    }

    pub fn upgrade(&self) -> Option<Arc<Mutex<CacheSet>>> {
        match self {
            Self::Root(set) => Some(set.clone()),
            Self::Child(weak) => weak.upgrade(),
        }
    }

    /// Whether both handles refer to the same cache set.
    pub fn same_as(&self, other: &CacheHandle) -> bool {
        match (self.upgrade(), other.upgrade()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    /// Runs `f` with the caches locked, or returns `None` when they are gone.
    pub fn with<R>(&self, f: impl FnOnce(&mut CacheSet) -> R) -> Option<R> {
        let set = self.upgrade()?;
        let mut guard = set.lock();
        Some(f(&mut guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_cache_dedups_by_uri() {
        let mut cache = CollectionCache::default();
        let first = Arc::new(RemoteCollectionItems::default());
        let second = Arc::new(RemoteCollectionItems::default());
        cache.add_mapping(0, "intent:a#Intent;end", first.clone());
        cache.add_mapping(1, "intent:a#Intent;end", second);

        let a = cache.items_for_id(0).expect("id 0");
        let b = cache.items_for_id(1).expect("id 1");
        assert!(Arc::ptr_eq(&a, &first));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.items_for_id(2).is_none());
        assert_eq!(cache.entries().count(), 2);
    }

    #[test]
    fn app_infos_are_interned() {
        let mut cache = AppInfoCache::default();
        let a = cache.intern(&Arc::new(ApplicationInfo::new("com.example", 10)));
        let b = cache.intern(&Arc::new(ApplicationInfo::new("com.example", 10)));
        let c = cache.intern(&Arc::new(ApplicationInfo::new("com.example", 11)));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn child_handles_do_not_own_the_set() {
        let root = CacheHandle::new_root();
        let child = root.downgrade();
        assert!(child.same_as(&root));
        assert!(child.with(|set| set.bitmaps.len()).is_some());

        drop(root);
        assert!(child.upgrade().is_none());
        assert!(CacheHandle::detached().with(|_| ()).is_none());
    }
}
