//
// events.rs
//
// Index lifecycle notifications
//
// Subscribers register plain callbacks; emission is synchronous and in
// registration order, so a listener observes the index state right after
// the change it is told about.
//

use std::sync::Mutex;

type ManifestIndexedFn = Box<dyn Fn(&str) + Send + Sync>;
type InvalidatedAllFn = Box<dyn Fn() + Send + Sync>;
type RebuiltFn = Box<dyn Fn(usize) + Send + Sync>;

/// Callback registry for index lifecycle events.
#[derive(Default)]
pub struct EventBus {
    manifest_indexed: Mutex<Vec<ManifestIndexedFn>>,
    invalidated_all: Mutex<Vec<InvalidatedAllFn>>,
    rebuilt: Mutex<Vec<RebuiltFn>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single manifest was (re)indexed; the callback receives its
    /// bundle id.
    pub fn on_manifest_indexed(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.manifest_indexed.lock() {
            listeners.push(Box::new(f));
        }
    }

    /// The whole index was cleared at the start of a rebuild.
    pub fn on_index_invalidated_all(&self, f: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.invalidated_all.lock() {
            listeners.push(Box::new(f));
        }
    }

    /// A rebuild finished; the callback receives the number of manifests
    /// discovered (indexed or not).
    pub fn on_index_rebuilt(&self, f: impl Fn(usize) + Send + Sync + 'static) {
        if let Ok(mut listeners) = self.rebuilt.lock() {
            listeners.push(Box::new(f));
        }
    }

    pub(crate) fn emit_manifest_indexed(&self, bundle_id: &str) {
        if let Ok(listeners) = self.manifest_indexed.lock() {
            for listener in listeners.iter() {
                listener(bundle_id);
            }
        }
    }

    pub(crate) fn emit_index_invalidated_all(&self) {
        if let Ok(listeners) = self.invalidated_all.lock() {
            for listener in listeners.iter() {
                listener();
            }
        }
    }

    pub(crate) fn emit_index_rebuilt(&self, manifest_count: usize) {
        if let Ok(listeners) = self.rebuilt.lock() {
            for listener in listeners.iter() {
                listener(manifest_count);
            }
        }
    }
}
