// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

use rkyv::rancor;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

/// An encoded event as the engine sees it: the registry tag plus the archived payload.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub struct StoredEvent {
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl StoredEvent {
    pub fn new(event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<AlignedVec, rancor::Error> {
        rkyv::to_bytes::<rancor::Error>(self)
    }

    /// Decodes and validates an envelope. `bytes` need not be aligned.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rancor::Error> {
        let aligned = align(bytes);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned)
    }
}

/// A [`StoredEvent`] together with the version it was committed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub version: u64,
    pub event: StoredEvent,
}

/// Copies `bytes` into a buffer aligned for rkyv access.
pub(crate) fn align(bytes: &[u8]) -> AlignedVec {
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    aligned
}

/// Position of one event in the LMDB `events` database.
///
/// Packed big-endian as `stream_id` in the high 64 bits and `version` in the low
/// 64 bits, so one stream's events are contiguous and sorted by version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub stream_id: u64,
    pub version: u64,
}

impl EventKey {
    pub fn new(stream_id: u64, version: u64) -> Self {
        Self { stream_id, version }
    }

    pub fn pack(self) -> u128 {
        ((self.stream_id as u128) << 64) | self.version as u128
    }

    pub fn unpack(packed: u128) -> Self {
        Self {
            stream_id: (packed >> 64) as u64,
            version: packed as u64,
        }
    }
}

/// Head of one stream in the LMDB `streams` database: its internal id and current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    pub stream_id: u64,
    pub version: u64,
}

impl StreamHead {
    pub fn pack(self) -> u128 {
        EventKey::new(self.stream_id, self.version).pack()
    }

    pub fn unpack(packed: u128) -> Self {
        let EventKey { stream_id, version } = EventKey::unpack(packed);
        Self { stream_id, version }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_keys_sort_by_stream_then_version() {
        let a = EventKey::new(1, u64::MAX).pack();
        let b = EventKey::new(2, 1).pack();
        let c = EventKey::new(2, 2).pack();
        assert!(a < b && b < c);
        assert!(a.to_be_bytes() < b.to_be_bytes());
    }

    #[test]
    fn stream_head_unpacks_what_it_packs() {
        let head = StreamHead {
            stream_id: 7,
            version: 42,
        };
        assert_eq!(StreamHead::unpack(head.pack()), head);
    }

    #[test]
    fn stored_event_survives_unaligned_storage() {
        let event = StoredEvent::new("counter.incremented", vec![1, 2, 3, 4, 5]);
        let bytes = event.to_bytes().unwrap();

        // Shift by one byte to break the original alignment.
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);

        assert_eq!(StoredEvent::from_bytes(&shifted[1..]).unwrap(), event);
    }

    #[test]
    fn corrupt_envelopes_are_rejected() {
        assert!(StoredEvent::from_bytes(&[0xFF; 3]).is_err());
    }
}
