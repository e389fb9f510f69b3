// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! LMDB-backed engine.
//!
//! Two databases:
//! - `streams`: stream key → packed [`StreamHead`] (internal stream id + current version)
//! - `events`: packed [`EventKey`] → archived [`StoredEvent`]
//!
//! LMDB allows one write transaction at a time per environment, across threads
//! *and* processes, so checking the head and writing the events inside a single
//! write transaction is an atomic compare-and-append.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use heed::byteorder::BigEndian;
use heed::types::{Bytes, Str, U128};
use heed::{Database, Env, EnvOpenOptions, PutFlags};
use tokio::sync::mpsc;

use super::{EngineError, EngineResult, ExpectedVersion, StreamEngine, VersionRange};
use crate::constants;
use crate::error::{Error, Result};
use crate::key::StreamKey;
use crate::log;
use crate::model::{EventKey, StoredEvent, StoredRecord, StreamHead};

// Type Aliases for readability
pub type StreamsDb = Database<Str, U128<BigEndian>>;
pub type EventsDb = Database<U128<BigEndian>, Bytes>;

/// Configuration for opening an LMDB environment.
#[derive(Debug, Clone)]
pub struct LmdbConfig {
    pub path: PathBuf,
    pub map_size: usize,
    pub max_dbs: u32,
    pub max_readers: u32,
    pub create_dir: bool,
    /// Records fetched per read transaction.
    pub read_batch_size: usize,
    /// Records buffered between a read producer and its consumer.
    pub read_buffer: usize,
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stranddb.mdb"),
            map_size: constants::DEFAULT_MAP_SIZE,
            max_dbs: constants::DEFAULT_MAX_DBS,
            max_readers: constants::DEFAULT_MAX_READERS,
            create_dir: true,
            read_batch_size: constants::DEFAULT_READ_BATCH_SIZE,
            read_buffer: constants::DEFAULT_READ_BUFFER,
        }
    }
}

impl LmdbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Reads `STRANDDB_PATH` (required) and `STRANDDB_MAP_SIZE` (optional, bytes).
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(constants::ENV_PATH)
            .map_err(|_| Error::InvalidConfig(format!("{} is required", constants::ENV_PATH)))?;

        let mut config = Self::new(path);
        if let Ok(raw) = std::env::var(constants::ENV_MAP_SIZE) {
            config.map_size = raw.parse().map_err(|_| {
                Error::InvalidConfig(format!(
                    "{} must be a size in bytes, got {raw:?}",
                    constants::ENV_MAP_SIZE
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("LMDB path cannot be empty".into()));
        }
        if self.max_dbs < constants::DEFAULT_MAX_DBS {
            return Err(Error::InvalidConfig(format!(
                "max_dbs must be at least {}",
                constants::DEFAULT_MAX_DBS
            )));
        }
        if self.read_batch_size == 0 || self.read_buffer == 0 {
            return Err(Error::InvalidConfig(
                "read_batch_size and read_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct LmdbCore {
    env: Env,
    streams: StreamsDb,
    events: EventsDb,
    config: LmdbConfig,
    closed: AtomicBool,
}

/// A cheap, cloneable handle to one LMDB environment.
#[derive(Clone)]
pub struct LmdbEngine {
    core: Arc<LmdbCore>,
}

impl std::fmt::Debug for LmdbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbEngine")
            .field("path", &self.core.config.path)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl LmdbEngine {
    /// Opens (and if needed creates) the environment and its databases.
    ///
    /// This blocks on file-system work; use [`LmdbEngine::open_async`] from async code.
    pub fn open(config: LmdbConfig) -> EngineResult<Self> {
        if config.create_dir {
            std::fs::create_dir_all(&config.path)?;
        }

        // SAFETY: the environment is opened once per path by this handle and
        // shared through `Arc`; LMDB's own locking covers other processes.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_dbs(config.max_dbs)
                .max_readers(config.max_readers)
                .open(&config.path)?
        };

        let mut wtxn = env.write_txn()?;
        let streams: StreamsDb = env.create_database(&mut wtxn, Some(constants::STREAMS_DB_NAME))?;
        let events: EventsDb = env.create_database(&mut wtxn, Some(constants::EVENTS_DB_NAME))?;
        wtxn.commit()?;

        log::debug!(path = %config.path.display(), "opened LMDB environment");

        Ok(Self {
            core: Arc::new(LmdbCore {
                env,
                streams,
                events,
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub async fn open_async(config: LmdbConfig) -> EngineResult<Self> {
        tokio::task::spawn_blocking(move || Self::open(config)).await?
    }

    pub fn config(&self) -> &LmdbConfig {
        &self.core.config
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.core.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

impl LmdbCore {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// LMDB refuses keys over `MDB_MAXKEYSIZE` with `MDB_BAD_VALSIZE`.
    fn check_key(&self, stream: &StreamKey) -> EngineResult<()> {
        let (len, max) = (stream.as_str().len(), self.env.max_key_size());
        if len > max {
            return Err(EngineError::KeyTooLong { len, max });
        }
        Ok(())
    }

    fn head(&self, stream: &str) -> EngineResult<Option<StreamHead>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.streams.get(&rtxn, stream)?.map(StreamHead::unpack))
    }

    fn append(
        &self,
        stream: &str,
        expected: ExpectedVersion,
        events: &[StoredEvent],
    ) -> EngineResult<u64> {
        // Encode before taking the writer lock to keep the transaction short.
        let encoded = events
            .iter()
            .map(StoredEvent::to_bytes)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::Encoding(e.to_string()))?;

        let mut wtxn = self.env.write_txn()?;

        let head = self.streams.get(&wtxn, stream)?.map(StreamHead::unpack);
        let current = head.map_or(0, |h| h.version);
        if !expected.matches(current) {
            // Dropping `wtxn` aborts it.
            return Err(EngineError::WrongExpectedVersion {
                stream: stream.to_string(),
                expected,
                current,
            });
        }
        if encoded.is_empty() {
            return Ok(current);
        }

        let next = current
            .checked_add(encoded.len() as u64)
            .ok_or_else(|| EngineError::VersionOverflow(stream.to_string()))?;
        // Streams are never deleted, so the count is a fresh id.
        let stream_id = match head {
            Some(head) => head.stream_id,
            None => self.streams.len(&wtxn)? + 1,
        };

        for (version, bytes) in (current + 1..=next).zip(&encoded) {
            let key = EventKey::new(stream_id, version).pack();
            self.events
                .put_with_flags(&mut wtxn, PutFlags::NO_OVERWRITE, &key, bytes.as_slice())?;
        }

        let head = StreamHead {
            stream_id,
            version: next,
        };
        self.streams.put(&mut wtxn, stream, &head.pack())?;
        wtxn.commit()?;

        Ok(next)
    }

    /// Feeds `tx` with the records in `range`, one short read transaction per batch.
    fn produce(
        &self,
        stream: &str,
        range: VersionRange,
        tx: &mpsc::Sender<EngineResult<StoredRecord>>,
    ) -> EngineResult<()> {
        let Some(head) = self.head(stream)? else {
            return Ok(());
        };

        let range = range.clamp(head.version);
        if range.is_empty() {
            return Ok(());
        }

        let batch = self.config.read_batch_size.max(1) as u64;
        let mut next = range.after + 1;

        loop {
            let last = next.saturating_add(batch - 1).min(range.through);
            let records = self.read_batch(stream, head.stream_id, next, last)?;

            for record in records {
                if tx.blocking_send(Ok(record)).is_err() {
                    // Consumer dropped the stream.
                    return Ok(());
                }
            }

            if last >= range.through {
                return Ok(());
            }
            next = last + 1;
        }
    }

    fn read_batch(
        &self,
        stream: &str,
        stream_id: u64,
        first: u64,
        last: u64,
    ) -> EngineResult<Vec<StoredRecord>> {
        let rtxn = self.env.read_txn()?;
        let lo = EventKey::new(stream_id, first).pack();
        let hi = EventKey::new(stream_id, last).pack();

        let mut records = Vec::with_capacity((last - first + 1) as usize);
        let mut expected = first;
        for item in self.events.range(&rtxn, &(lo..=hi))? {
            let (key, bytes) = item?;
            let version = EventKey::unpack(key).version;
            if version != expected {
                return Err(EngineError::Corrupted {
                    stream: stream.to_string(),
                    reason: format!("expected version {expected}, found {version}"),
                });
            }

            let event =
                StoredEvent::from_bytes(bytes).map_err(|e| EngineError::Encoding(e.to_string()))?;
            records.push(StoredRecord { version, event });
            expected += 1;
        }

        if expected != last + 1 {
            return Err(EngineError::Corrupted {
                stream: stream.to_string(),
                reason: format!("missing versions {expected}..={last}"),
            });
        }

        Ok(records)
    }
}

enum ReadState {
    Pending {
        core: Arc<LmdbCore>,
        stream: String,
        range: VersionRange,
    },
    Running(mpsc::Receiver<EngineResult<StoredRecord>>),
    Done,
}

#[async_trait]
impl StreamEngine for LmdbEngine {
    async fn append_to_stream(
        &self,
        stream: &StreamKey,
        expected: ExpectedVersion,
        events: Vec<StoredEvent>,
    ) -> EngineResult<u64> {
        self.ensure_open()?;
        self.core.check_key(stream)?;

        let core = Arc::clone(&self.core);
        let stream = stream.as_str().to_owned();
        // The blocking task owns the transaction; dropping this future cannot tear it.
        tokio::task::spawn_blocking(move || core.append(&stream, expected, &events)).await?
    }

    fn read_stream(
        &self,
        stream: &StreamKey,
        range: VersionRange,
    ) -> BoxStream<'static, EngineResult<StoredRecord>> {
        if let Err(e) = self.core.check_key(stream) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let state = ReadState::Pending {
            core: Arc::clone(&self.core),
            stream: stream.as_str().to_owned(),
            range,
        };

        stream::unfold(state, |state| async move {
            let mut rx = match state {
                ReadState::Pending { core, stream, range } => {
                    if core.is_closed() {
                        return Some((Err(EngineError::Closed), ReadState::Done));
                    }
                    if range.is_empty() {
                        return None;
                    }

                    let (tx, rx) = mpsc::channel(core.config.read_buffer.max(1));
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = core.produce(&stream, range, &tx) {
                            let _ = tx.blocking_send(Err(e));
                        }
                    });
                    rx
                }
                ReadState::Running(rx) => rx,
                ReadState::Done => return None,
            };

            rx.recv().await.map(|item| {
                let next = match item {
                    Ok(_) => ReadState::Running(rx),
                    Err(_) => ReadState::Done,
                };
                (item, next)
            })
        })
        .boxed()
    }

    async fn current_version(&self, stream: &StreamKey) -> EngineResult<u64> {
        self.ensure_open()?;
        self.core.check_key(stream)?;

        let core = Arc::clone(&self.core);
        let stream = stream.as_str().to_owned();
        let head = tokio::task::spawn_blocking(move || core.head(&stream)).await??;
        Ok(head.map_or(0, |h| h.version))
    }

    async fn close(&self) -> EngineResult<()> {
        if !self.core.closed.swap(true, Ordering::AcqRel) {
            // The environment itself is released when the last handle drops.
            let core = Arc::clone(&self.core);
            tokio::task::spawn_blocking(move || core.env.force_sync()).await??;
            log::debug!(path = %self.core.config.path.display(), "closed LMDB environment");
        }
        Ok(())
    }
}
