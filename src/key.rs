// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! Entity identifiers and the stream keys derived from them.

use std::fmt;

use crate::constants::{MAX_STREAM_KEY_LEN, STREAM_KEY_SEPARATOR};
use crate::error::{Error, Result};

/// Identifies one entity: a type name (`kind`) plus a unique instance key.
///
/// `kind` may not contain the stream key separator, which is what makes the
/// derived [`StreamKey`] lossless.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    kind: String,
    key: String,
}

impl EntityId {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        let key = key.into();

        if kind.is_empty() {
            return Err(Error::InvalidArgument("entity kind cannot be empty".into()));
        }
        if kind.contains(STREAM_KEY_SEPARATOR) {
            return Err(Error::InvalidArgument(format!(
                "entity kind {kind:?} cannot contain {STREAM_KEY_SEPARATOR:?}"
            )));
        }
        if key.is_empty() {
            return Err(Error::InvalidArgument("entity key cannot be empty".into()));
        }
        check_len(kind.len() + STREAM_KEY_SEPARATOR.len_utf8() + key.len())?;

        Ok(Self { kind, key })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stream_key(&self) -> StreamKey {
        StreamKey(format!("{}{}{}", self.kind, STREAM_KEY_SEPARATOR, self.key))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.kind, STREAM_KEY_SEPARATOR, self.key)
    }
}

/// The storage key of one entity's event stream.
///
/// Keys built from an [`EntityId`] look like `Counter/abc`. A raw key is accepted
/// too, as long as it is not empty. Either way the key is at most
/// [`MAX_STREAM_KEY_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidArgument("stream key cannot be empty".into()));
        }
        check_len(raw.len())?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the entity this key was derived from, if it has the `kind/key` shape.
    pub fn entity(&self) -> Option<EntityId> {
        let (kind, key) = self.0.split_once(STREAM_KEY_SEPARATOR)?;
        EntityId::new(kind, key).ok()
    }
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_STREAM_KEY_LEN {
        return Err(Error::InvalidArgument(format!(
            "stream key is {len} bytes, the limit is {MAX_STREAM_KEY_LEN}"
        )));
    }
    Ok(())
}

impl From<&EntityId> for StreamKey {
    fn from(id: &EntityId) -> Self {
        id.stream_key()
    }
}

impl From<EntityId> for StreamKey {
    fn from(id: EntityId) -> Self {
        id.stream_key()
    }
}

impl AsRef<str> for StreamKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn stream_key_is_kind_then_key() {
        let id = EntityId::new("Counter", "abc").unwrap();
        assert_eq!(id.stream_key().as_str(), "Counter/abc");
        assert_eq!(id.to_string(), "Counter/abc");
    }

    #[rstest]
    #[case("Counter", "abc")]
    #[case("Order", "2024/01/15/42")]
    #[case("Büro", "ключ")]
    fn stream_key_round_trips_to_entity(#[case] kind: &str, #[case] key: &str) {
        let id = EntityId::new(kind, key).unwrap();
        assert_eq!(id.stream_key().entity(), Some(id));
    }

    #[test]
    fn distinct_entities_get_distinct_keys() {
        let a = EntityId::new("A", "b/c").unwrap();
        let b = EntityId::new("A", "b").unwrap();
        assert_ne!(a.stream_key(), b.stream_key());
    }

    #[rstest]
    #[case("", "abc")]
    #[case("Counter", "")]
    #[case("Coun/ter", "abc")]
    #[case("Counter", &"k".repeat(600))]
    #[case("Counter", &"k".repeat(MAX_STREAM_KEY_LEN - "Counter/".len() + 1))]
    fn invalid_entities_are_rejected(#[case] kind: &str, #[case] key: &str) {
        assert!(matches!(
            EntityId::new(kind, key),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn keys_up_to_the_limit_are_accepted() {
        let key = "k".repeat(MAX_STREAM_KEY_LEN - "Counter/".len());
        let id = EntityId::new("Counter", key).unwrap();
        assert_eq!(id.stream_key().as_str().len(), MAX_STREAM_KEY_LEN);

        assert!(StreamKey::new("k".repeat(MAX_STREAM_KEY_LEN)).is_ok());
        assert!(matches!(
            StreamKey::new("k".repeat(MAX_STREAM_KEY_LEN + 1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn key_length_counts_bytes() {
        // Two bytes per char in UTF-8.
        let raw = "é".repeat(MAX_STREAM_KEY_LEN / 2 + 1);
        assert!(matches!(StreamKey::new(raw), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn raw_keys_must_not_be_empty() {
        assert!(matches!(StreamKey::new(""), Err(Error::InvalidArgument(_))));
        let raw = StreamKey::new("no-separator").unwrap();
        assert_eq!(raw.entity(), None);
    }
}
