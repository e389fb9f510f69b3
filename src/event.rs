// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! Event payloads and the registry that turns them into bytes and back.
//!
//! A stream can hold events of many types. Each payload type implements
//! [`EventType`] with a stable tag, and is registered once in an
//! [`EventRegistry`]. On append the tag travels with the archived payload; on
//! read the tag picks the decoder, which yields a `Box<dyn Event>` holding the
//! concrete stored type. Reading as a concrete type downcasts that handle;
//! reading as `Box<dyn Event>` keeps it as is.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::{self, Strategy};
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;

use crate::error::{Error, Result};
use crate::model::{self, StoredEvent};

/// Allocating rkyv serializer used for every event payload.
pub type EventSerializer<'a> = HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>;

/// A concrete event payload type.
///
/// `EVENT_TYPE` is written next to every stored payload and must stay stable for
/// as long as events of this type exist on disk.
///
/// ```ignore
/// #[derive(Archive, Serialize, Deserialize, Debug, PartialEq)]
/// struct Incremented { amount: u32 }
///
/// impl EventType for Incremented {
///     const EVENT_TYPE: &'static str = "counter.incremented";
/// }
/// ```
pub trait EventType:
    fmt::Debug + Send + Sync + 'static + for<'a> rkyv::Serialize<EventSerializer<'a>>
{
    const EVENT_TYPE: &'static str;
}

/// Object-safe view of any event payload.
///
/// Implemented for every [`EventType`] and for `Box<dyn Event>`, so a batch can
/// be either `&[MyEvent]` or `&[Box<dyn Event>]` when types are mixed.
pub trait Event: Any + fmt::Debug + Send + Sync {
    fn event_type(&self) -> &'static str;

    fn encode(&self) -> std::result::Result<AlignedVec, rancor::Error>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: EventType> Event for T {
    fn event_type(&self) -> &'static str {
        T::EVENT_TYPE
    }

    fn encode(&self) -> std::result::Result<AlignedVec, rancor::Error> {
        rkyv::to_bytes::<rancor::Error>(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl Event for Box<dyn Event> {
    fn event_type(&self) -> &'static str {
        (**self).event_type()
    }

    fn encode(&self) -> std::result::Result<AlignedVec, rancor::Error> {
        (**self).encode()
    }

    fn as_any(&self) -> &dyn Any {
        (**self).as_any()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        let inner: Box<dyn Event> = *self;
        inner.into_any()
    }
}

impl dyn Event {
    pub fn is<T: EventType>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: EventType>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// How a read turns a decoded payload into the type the caller asked for.
pub trait ReadAs: Sized + Send + 'static {
    fn read_as(event: Box<dyn Event>) -> Result<Self>;
}

impl<T: EventType> ReadAs for T {
    fn read_as(event: Box<dyn Event>) -> Result<Self> {
        let actual = event.event_type();
        event
            .into_any()
            .downcast::<T>()
            .map(|event| *event)
            .map_err(|_| Error::UnexpectedEventType {
                expected: T::EVENT_TYPE,
                actual: actual.to_string(),
            })
    }
}

impl ReadAs for Box<dyn Event> {
    fn read_as(event: Box<dyn Event>) -> Result<Self> {
        Ok(event)
    }
}

/// An event payload paired with the version it was committed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord<T> {
    pub event: T,
    pub version: u64,
}

impl<T> EventRecord<T> {
    pub fn new(event: T, version: u64) -> Self {
        Self { event, version }
    }
}

type Decoder = fn(&[u8]) -> std::result::Result<Box<dyn Event>, rancor::Error>;

fn decode_as<T>(bytes: &[u8]) -> std::result::Result<Box<dyn Event>, rancor::Error>
where
    T: EventType,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + rkyv::Deserialize<T, Strategy<Pool, rancor::Error>>,
{
    let aligned = model::align(bytes);
    let event = rkyv::from_bytes::<T, rancor::Error>(&aligned)?;
    Ok(Box::new(event))
}

/// Maps event type tags to decoders.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, (TypeId, Decoder)>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its `EVENT_TYPE` tag.
    ///
    /// Registering the same type twice is harmless; registering a different type
    /// under a tag that is already taken is a configuration error.
    pub fn register<T>(&mut self) -> Result<&mut Self>
    where
        T: EventType,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
            + rkyv::Deserialize<T, Strategy<Pool, rancor::Error>>,
    {
        let type_id = TypeId::of::<T>();
        if let Some((existing, _)) = self.decoders.get(T::EVENT_TYPE) {
            if *existing != type_id {
                return Err(Error::InvalidConfig(format!(
                    "event type tag {:?} is already registered for another type",
                    T::EVENT_TYPE
                )));
            }
            return Ok(self);
        }

        self.decoders
            .insert(T::EVENT_TYPE, (type_id, decode_as::<T> as Decoder));
        Ok(self)
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Encodes one payload into the envelope handed to the engine.
    ///
    /// Unregistered types are refused up front: they could be written but never read.
    pub fn encode(&self, event: &dyn Event) -> Result<StoredEvent> {
        let event_type = event.event_type();
        match self.decoders.get(event_type) {
            Some((type_id, _)) if *type_id == event.as_any().type_id() => {}
            Some(_) => {
                return Err(Error::InvalidArgument(format!(
                    "event type tag {event_type:?} belongs to another registered type"
                )))
            }
            None => return Err(Error::UnknownEventType(event_type.to_string())),
        }

        let payload = event.encode()?;
        Ok(StoredEvent::new(event_type, payload.to_vec()))
    }

    /// Decodes an envelope into the concrete type its tag names.
    pub fn decode(&self, stored: &StoredEvent) -> Result<Box<dyn Event>> {
        let (_, decoder) = self
            .decoders
            .get(stored.event_type.as_str())
            .ok_or_else(|| Error::UnknownEventType(stored.event_type.clone()))?;
        Ok(decoder(&stored.payload)?)
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().collect();
        tags.sort();
        f.debug_struct("EventRegistry").field("types", &tags).finish()
    }
}
