#![allow(dead_code)]

use docstore_cache::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Log output is controlled with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manual_cache() -> Result<Arc<DocumentCache<MemoryStore>>, Box<dyn std::error::Error>> {
    init_tracing();
    Ok(DocumentCache::builder()
        .name("test")
        .store(Arc::new(MemoryStore::new()))
        .auto_flush(false)
        .build()?)
}

/// A listener collecting everything it receives.
pub fn recorder() -> (Listener, Arc<Mutex<Vec<ChangeEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener: Listener = Arc::new(move |event: &ChangeEvent| sink.lock().push(event.clone()));
    (listener, events)
}
