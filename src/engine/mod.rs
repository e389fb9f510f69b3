// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! The boundary between the store and the engine that actually persists streams.
//!
//! An engine owns one thing the store cannot do by itself: an atomic
//! compare-and-append. Everything else (type registry, lifecycle, argument
//! validation) lives above this trait.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use heed::MdbError;
use thiserror::Error;

use crate::key::StreamKey;
use crate::model::{StoredEvent, StoredRecord};

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbConfig, LmdbEngine};
pub use memory::MemoryEngine;

/// The precondition an append is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// The stream must not have any events yet.
    NoStream,
    /// The stream must exist and be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Maps a caller version to a precondition: `0` creates the stream.
    pub fn from_version(version: u64) -> Self {
        match version {
            0 => Self::NoStream,
            v => Self::Exact(v),
        }
    }

    pub fn version(self) -> u64 {
        match self {
            Self::NoStream => 0,
            Self::Exact(v) => v,
        }
    }

    /// Whether a stream currently at `current` (0 when missing) satisfies this precondition.
    pub fn matches(self, current: u64) -> bool {
        match self {
            Self::NoStream => current == 0,
            Self::Exact(v) => v == current,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Versions `after + 1 ..= through` of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub after: u64,
    pub through: u64,
}

impl VersionRange {
    /// Builds the range a read of `max_count` records after `from_version` covers.
    ///
    /// The upper bound saturates at `u64::MAX`, which reads as unbounded.
    pub fn new(from_version: u64, max_count: Option<u64>) -> Self {
        let through = match max_count {
            Some(count) => from_version.saturating_add(count),
            None => u64::MAX,
        };
        Self {
            after: from_version,
            through,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.through <= self.after
    }

    /// Truncates the range at a stream's current version.
    pub fn clamp(self, current: u64) -> Self {
        Self {
            after: self.after,
            through: self.through.min(current),
        }
    }

    pub fn len(&self) -> u64 {
        self.through.saturating_sub(self.after)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// The compare part of compare-and-append failed.
    #[error("Wrong expected version for stream {stream}: expected {expected}, current {current}")]
    WrongExpectedVersion {
        stream: String,
        expected: ExpectedVersion,
        current: u64,
    },

    /// Appending would push the stream version past `u64::MAX`.
    #[error("Version overflow for stream {0}")]
    VersionOverflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    /// An envelope could not be encoded or decoded.
    #[error("Event encoding failed: {0}")]
    Encoding(String),

    /// Stored data broke a stream invariant.
    #[error("Stream {stream} is corrupted: {reason}")]
    Corrupted { stream: String, reason: String },

    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The engine could not serve the request right now.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// The stream key is longer than the backend can index.
    #[error("Stream key is {len} bytes, the engine accepts at most {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("Engine is closed")]
    Closed,
}

impl EngineError {
    /// Whether the same call may succeed later without any change by the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Task(_) | Self::Unavailable(_) => true,
            Self::Heed(heed::Error::Io(_)) => true,
            Self::Heed(heed::Error::Mdb(e)) => matches!(
                e,
                MdbError::ReadersFull
                    | MdbError::TxnFull
                    | MdbError::CursorFull
                    | MdbError::PageFull
                    | MdbError::MapResized
                    | MdbError::BadRslot
            ),
            Self::Heed(_)
            | Self::WrongExpectedVersion { .. }
            | Self::VersionOverflow(_)
            | Self::Encoding(_)
            | Self::Corrupted { .. }
            | Self::KeyTooLong { .. }
            | Self::Closed => false,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// An atomic-append-capable event storage engine.
///
/// Implementations must be safe for concurrent use: the store shares one
/// handle between all in-flight operations and never serialises them itself.
#[async_trait]
pub trait StreamEngine: Send + Sync + 'static {
    /// Appends `events` if the stream satisfies `expected`, returning the new version.
    ///
    /// A failed precondition is reported as [`EngineError::WrongExpectedVersion`]
    /// with nothing written. The check and the write must be one atomic step.
    async fn append_to_stream(
        &self,
        stream: &StreamKey,
        expected: ExpectedVersion,
        events: Vec<StoredEvent>,
    ) -> EngineResult<u64>;

    /// Streams the records in `range`, in version order, truncated at the
    /// stream's current version. No work happens until the stream is polled.
    fn read_stream(
        &self,
        stream: &StreamKey,
        range: VersionRange,
    ) -> BoxStream<'static, EngineResult<StoredRecord>>;

    /// Current version of a stream, `0` when it does not exist.
    async fn current_version(&self, stream: &StreamKey) -> EngineResult<u64>;

    /// Releases the engine. Later calls fail with [`EngineError::Closed`].
    async fn close(&self) -> EngineResult<()>;
}
