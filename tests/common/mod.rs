#![allow(dead_code)]

use std::sync::Arc;

use rkyv::{Archive, Deserialize, Serialize};
use stranddb::{
    EventRegistry, EventStreamStore, EventType, LmdbConfig, MemoryEngine, StoreOptions,
};
use tempfile::TempDir;

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Incremented {
    pub amount: u32,
}

impl EventType for Incremented {
    const EVENT_TYPE: &'static str = "counter.incremented";
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reset {
    pub value: u32,
}

impl EventType for Reset {
    const EVENT_TYPE: &'static str = "counter.reset";
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Renamed {
    pub name: String,
}

impl EventType for Renamed {
    const EVENT_TYPE: &'static str = "counter.renamed";
}

pub fn registry() -> EventRegistry {
    let mut registry = EventRegistry::new();
    registry
        .register::<Incremented>()
        .unwrap()
        .register::<Reset>()
        .unwrap()
        .register::<Renamed>()
        .unwrap();
    registry
}

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Lmdb,
}

/// A ready store plus whatever keeps its backend alive.
pub struct Harness {
    pub store: Arc<EventStreamStore>,
    pub memory: Option<MemoryEngine>,
    pub dir: Option<TempDir>,
}

pub fn lmdb_config(dir: &TempDir) -> LmdbConfig {
    LmdbConfig {
        map_size: 10 * 1024 * 1024,
        read_batch_size: 4,
        ..LmdbConfig::new(dir.path().join("store.mdb"))
    }
}

pub async fn harness(backend: Backend) -> Harness {
    let (options, memory, dir) = match backend {
        Backend::Memory => {
            let engine = MemoryEngine::new();
            let options = StoreOptions::new("test").with_memory(engine.clone());
            (options, Some(engine), None)
        }
        Backend::Lmdb => {
            let dir = tempfile::tempdir().unwrap();
            let options = StoreOptions::new("test").with_lmdb(lmdb_config(&dir));
            (options, None, Some(dir))
        }
    };

    let store = Arc::new(EventStreamStore::new(options, registry()));
    store.init().await.unwrap();
    Harness { store, memory, dir }
}
