// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::engine::EngineError;
use crate::store::StoreState;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Custom error type for StrandDB operations.
///
/// An optimistic-concurrency rejection is not an error: `append` reports it as
/// `Ok(false)`.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller passed an argument the store cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The engine could not be created. The store is closed for good.
    #[error("Event stream store {name} failed to initialize: {source}")]
    Initialization {
        name: String,
        #[source]
        source: BoxError,
    },

    /// An operation was issued outside the `Ready` state.
    #[error("Event stream store is not ready (state: {state})")]
    NotReady { state: StoreState },

    /// Event serialization or deserialization failed.
    #[error("Event serialization failed: {0}")]
    Serialization(String),

    /// A stored event carries a type tag the registry does not know.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// A stored event was read back as a different concrete type.
    #[error("Unexpected event type: expected {expected}, got {actual}")]
    UnexpectedEventType {
        expected: &'static str,
        actual: String,
    },

    /// The engine failed for a reason unrelated to concurrency.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] EngineError),

    /// The caller's cancellation token fired before the outcome was known.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether retrying the same call later may succeed.
    ///
    /// Only engine failures can be transient, and only those the engine itself
    /// reports as passing. A closed or corrupted engine stays that way.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rkyv::rancor::Error> for Error {
    fn from(e: rkyv::rancor::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Encoding(msg) => Self::Serialization(msg),
            e @ EngineError::KeyTooLong { .. } => Self::InvalidArgument(e.to_string()),
            other => Self::StorageUnavailable(other),
        }
    }
}
