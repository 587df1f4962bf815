use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Document;

/// Document handle shared between the interactive thread and the reformat
/// worker.
///
/// A panicking writer poisons the lock; readers still get the tree and the
/// session decides whether to restore a snapshot.
#[derive(Clone, Debug, Default)]
pub struct SharedDocument(Arc<RwLock<Document>>);

impl SharedDocument {
    #[must_use]
    pub fn new(doc: Document) -> Self {
        Self(Arc::new(RwLock::new(doc)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Document> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Document> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> Document {
        self.read().clone()
    }

    /// Swap in a whole tree, e.g. a restored snapshot
    pub fn replace(&self, doc: Document) {
        *self.write() = doc;
        self.0.clear_poison();
    }
}
