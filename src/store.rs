// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! The event stream store: lifecycle, optimistic appends, and lazy reads.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::StoreOptions;
use crate::constants::STORE_NAME_PREFIX;
use crate::engine::{EngineError, EngineResult, ExpectedVersion, StreamEngine, VersionRange};
use crate::error::{BoxError, Error, Result};
use crate::event::{Event, EventRecord, EventRegistry, ReadAs};
use crate::key::StreamKey;
use crate::lifecycle::{Lifecycle, LifecycleObserver};
use crate::log;
use crate::model::{StoredEvent, StoredRecord};
use crate::utils::timed;

/// Where a store is in its `Uninitialized -> Ready -> Closed` life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreState {
    Uninitialized,
    Ready,
    Closed,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "Uninitialized",
            Self::Ready => "Ready",
            Self::Closed => "Closed",
        })
    }
}

enum Handle {
    Uninitialized,
    Ready(Arc<dyn StreamEngine>),
    Closed,
}

impl Handle {
    fn state(&self) -> StoreState {
        match self {
            Self::Uninitialized => StoreState::Uninitialized,
            Self::Ready(_) => StoreState::Ready,
            Self::Closed => StoreState::Closed,
        }
    }
}

/// Stores each entity's events as an ordered, append-only stream.
///
/// Appends are optimistic: the caller names the version it last saw and the
/// append only lands if the stream is still there. Version `n` of a stream is
/// its `n`-th event, counting from 1.
///
/// The store must be initialized before use, either with [`init`](Self::init)
/// or by joining a host [`Lifecycle`] with [`participate`](Self::participate).
/// The engine handle is the only shared state, and no lock is held while an
/// append or read waits on it.
pub struct EventStreamStore {
    options: StoreOptions,
    registry: Arc<EventRegistry>,
    handle: RwLock<Handle>,
    // Serialises init and close against each other; appends and reads never take it.
    transition: tokio::sync::Mutex<()>,
}

impl EventStreamStore {
    pub fn new(options: StoreOptions, registry: EventRegistry) -> Self {
        Self {
            options,
            registry: Arc::new(registry),
            handle: RwLock::new(Handle::Uninitialized),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Name the store subscribes to a lifecycle under, e.g. `EventStreamStore-Default`.
    pub fn qualified_name(&self) -> String {
        format!("{STORE_NAME_PREFIX}-{}", self.options.name)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn state(&self) -> StoreState {
        self.handle.read().state()
    }

    /// Creates the engine handle and moves the store to `Ready`.
    ///
    /// Any failure is fatal: the store moves to `Closed` and the cause is
    /// returned inside [`Error::Initialization`].
    pub async fn init(&self) -> Result<()> {
        self.init_cancellable(&CancellationToken::new()).await
    }

    /// [`init`](Self::init), giving up when `cancel` fires.
    pub async fn init_cancellable(&self, cancel: &CancellationToken) -> Result<()> {
        let _transition = self.transition.lock().await;
        match self.state() {
            StoreState::Ready => return Ok(()),
            StoreState::Closed => {
                return Err(Error::NotReady {
                    state: StoreState::Closed,
                })
            }
            StoreState::Uninitialized => {}
        }

        log::debug!(
            store = %self.name(),
            service_id = %self.options.service_id,
            "EventStreamStore initializing"
        );

        #[cfg_attr(not(feature = "log"), allow(unused_variables, unused_assignments))]
        let mut elapsed = Duration::ZERO;
        let connected = timed!("init", |_: &str, took: Duration| elapsed = took, {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(BoxError::from("initialization was cancelled")),
                result = self.connect() => result,
            }
        });

        match connected {
            Ok(engine) => {
                *self.handle.write() = Handle::Ready(engine);
                log::debug!(
                    store = %self.name(),
                    service_id = %self.options.service_id,
                    elapsed_ms = %crate::utils::millis(elapsed),
                    "EventStreamStore initialized"
                );
                Ok(())
            }
            Err(source) => {
                *self.handle.write() = Handle::Closed;
                log::error!(
                    store = %self.name(),
                    service_id = %self.options.service_id,
                    elapsed_ms = %crate::utils::millis(elapsed),
                    error = %source,
                    "EventStreamStore failed to initialize"
                );
                Err(Error::Initialization {
                    name: self.options.name.clone(),
                    source,
                })
            }
        }
    }

    async fn connect(&self) -> std::result::Result<Arc<dyn StreamEngine>, BoxError> {
        self.options.validate()?;
        match &self.options.connector {
            Some(connector) => connector.connect().await,
            None => Err(BoxError::from("no connector configured")),
        }
    }

    /// Releases the engine handle. Closing twice, or before init, is a no-op
    /// beyond moving the store to `Closed`.
    pub async fn close(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let previous = std::mem::replace(&mut *self.handle.write(), Handle::Closed);

        match previous {
            Handle::Ready(engine) => {
                log::debug!(store = %self.name(), "EventStreamStore closing");
                engine.close().await.map_err(Error::StorageUnavailable)
            }
            Handle::Uninitialized | Handle::Closed => Ok(()),
        }
    }

    fn engine(&self) -> Result<Arc<dyn StreamEngine>> {
        match &*self.handle.read() {
            Handle::Ready(engine) => Ok(Arc::clone(engine)),
            other => Err(Error::NotReady {
                state: other.state(),
            }),
        }
    }

    /// Appends `events` to `stream` if its current version is `expected_version`.
    ///
    /// `expected_version == 0` creates the stream. On success the events take
    /// versions `expected_version + 1 ..= expected_version + events.len()`.
    /// A version mismatch, including a missing stream for a non-zero
    /// expectation, returns `Ok(false)` and writes nothing.
    pub async fn append<E: Event>(
        &self,
        stream: &StreamKey,
        events: &[E],
        expected_version: u64,
    ) -> Result<bool> {
        let engine = self.engine()?;
        let batch = self.encode_batch(stream, events, expected_version)?;
        let expected = ExpectedVersion::from_version(expected_version);

        match engine.append_to_stream(stream, expected, batch).await {
            Ok(_version) => {
                log::trace!(
                    %stream,
                    expected = expected_version,
                    version = _version,
                    "Appended events"
                );
                Ok(true)
            }
            Err(EngineError::WrongExpectedVersion { current: _current, .. }) => {
                log::debug!(
                    %stream,
                    expected = expected_version,
                    current = _current,
                    "Append rejected by version check"
                );
                Ok(false)
            }
            Err(e) => {
                log::warn!(%stream, error = %e, "Append failed");
                Err(e.into())
            }
        }
    }

    /// [`append`](Self::append), abandoned when `cancel` fires.
    ///
    /// `Err(Cancelled)` does not say whether the write happened: a commit that
    /// finished before the token fired stands. Re-read the current version
    /// before retrying.
    pub async fn append_cancellable<E: Event>(
        &self,
        stream: &StreamKey,
        events: &[E],
        expected_version: u64,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!(%stream, "Append cancelled");
                Err(Error::Cancelled)
            }
            result = self.append(stream, events, expected_version) => result,
        }
    }

    fn encode_batch<E: Event>(
        &self,
        stream: &StreamKey,
        events: &[E],
        expected_version: u64,
    ) -> Result<Vec<StoredEvent>> {
        if events.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "cannot append an empty batch to stream {stream}"
            )));
        }
        let count = u64::try_from(events.len()).unwrap_or(u64::MAX);
        if expected_version.checked_add(count).is_none() {
            return Err(Error::InvalidArgument(format!(
                "appending {count} events after version {expected_version} overflows stream {stream}"
            )));
        }

        events
            .iter()
            .map(|event| self.registry.encode(event))
            .collect()
    }

    /// Reads the events after `from_version`, at most `max_count` of them.
    ///
    /// The state check happens now; storage is not touched until the returned
    /// stream is first polled. A missing stream, or `from_version` at or past
    /// the current version, yields an empty stream.
    pub fn read<T: ReadAs>(
        &self,
        stream: &StreamKey,
        from_version: u64,
        max_count: Option<u64>,
    ) -> Result<EventStream<T>> {
        let engine = self.engine()?;
        let range = VersionRange::new(from_version, max_count);
        log::trace!(%stream, after = range.after, through = range.through, "Reading events");
        Ok(EventStream::new(
            engine.read_stream(stream, range),
            Arc::clone(&self.registry),
        ))
    }

    /// Current version of `stream`, `0` when it has no events.
    pub async fn current_version(&self, stream: &StreamKey) -> Result<u64> {
        let engine = self.engine()?;
        Ok(engine.current_version(stream).await?)
    }

    /// Subscribes the store to `lifecycle` at its configured init stage.
    pub fn participate(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        lifecycle.subscribe(
            self.qualified_name(),
            self.options.init_stage,
            Arc::clone(self) as Arc<dyn LifecycleObserver>,
        );
    }
}

impl fmt::Debug for EventStreamStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStreamStore")
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl LifecycleObserver for EventStreamStore {
    async fn on_start(&self, cancel: &CancellationToken) -> Result<()> {
        self.init_cancellable(cancel).await
    }

    async fn on_stop(&self, _cancel: &CancellationToken) -> Result<()> {
        self.close().await
    }
}

/// Lazy, finite, forward-only sequence of records from one read.
///
/// Each item is one record or the error that ended the read. Dropping the
/// stream stops the read.
pub struct EventStream<T> {
    inner: BoxStream<'static, Result<EventRecord<T>>>,
}

impl<T: ReadAs> EventStream<T> {
    fn new(
        records: BoxStream<'static, EngineResult<StoredRecord>>,
        registry: Arc<EventRegistry>,
    ) -> Self {
        let inner = records
            .map(move |item| -> Result<EventRecord<T>> {
                let record = item?;
                let event = registry.decode(&record.event)?;
                Ok(EventRecord::new(T::read_as(event)?, record.version))
            })
            .boxed();
        Self { inner }
    }

    /// Ends the stream with [`Error::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        let inner = stream::unfold(Some((self.inner, cancel)), |state| async move {
            let (mut inner, cancel) = state?;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = inner.next() => Some(item),
            };
            match next {
                None => Some((Err(Error::Cancelled), None)),
                Some(item) => item.map(|item| (item, Some((inner, cancel)))),
            }
        })
        .boxed();
        Self { inner }
    }

    /// Drains the stream, stopping at the first error.
    pub async fn collect_records(self) -> Result<Vec<EventRecord<T>>> {
        self.try_collect().await
    }
}

impl<T> Stream for EventStream<T> {
    type Item = Result<EventRecord<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}
