// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! StrandDB: append-only event streams with optimistic concurrency.
//!
//! Every entity owns one stream, keyed by its [`EntityId`]. Callers append
//! batches of events against the version they last observed and read them
//! back lazily as a [`futures_util::Stream`]. Streams are persisted by a
//! [`StreamEngine`]: [`LmdbEngine`] on disk, or [`MemoryEngine`] in process.
//!
//! ```ignore
//! let mut registry = EventRegistry::new();
//! registry.register::<Incremented>()?;
//!
//! let store = EventStreamStore::new(
//!     StoreOptions::new("counters").with_lmdb(LmdbConfig::new("./data")),
//!     registry,
//! );
//! store.init().await?;
//!
//! let stream = EntityId::new("Counter", "abc")?.stream_key();
//! assert!(store.append(&stream, &[Incremented { amount: 5 }], 0).await?);
//!
//! let records = store
//!     .read::<Incremented>(&stream, 0, None)?
//!     .collect_records()
//!     .await?;
//! ```

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod event;
pub mod key;
pub mod lifecycle;
pub mod log;
pub mod model;
pub mod store;
pub(crate) mod utils;

pub use config::{Connector, FnConnector, LmdbConnector, MemoryConnector, StoreOptions};
pub use engine::{
    EngineError, ExpectedVersion, LmdbConfig, LmdbEngine, MemoryEngine, StreamEngine,
    VersionRange,
};
pub use error::{Error, Result};
pub use event::{Event, EventRecord, EventRegistry, EventType, ReadAs};
pub use key::{EntityId, StreamKey};
pub use lifecycle::{stage, Lifecycle, LifecycleObserver};
pub use store::{EventStream, EventStreamStore, StoreState};
