// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! In-process engine for tests and single-process embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};

use super::{EngineError, EngineResult, ExpectedVersion, StreamEngine, VersionRange};
use crate::key::StreamKey;
use crate::model::{StoredEvent, StoredRecord};

#[derive(Default)]
struct Faults {
    next_append: Option<String>,
    next_read: Option<String>,
    commit_delay: Option<Duration>,
    ack_delay: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    streams: RwLock<HashMap<String, Vec<StoredEvent>>>,
    faults: Mutex<Faults>,
    closed: AtomicBool,
}

/// Keeps every stream in a map guarded by a short, never-awaited lock.
///
/// Clones share the same streams. Faults can be injected to exercise the
/// store's error paths.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("streams", &self.inner.streams.read().len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next append fail with [`EngineError::Unavailable`].
    pub fn fail_next_append(&self, reason: impl Into<String>) {
        self.inner.faults.lock().next_append = Some(reason.into());
    }

    /// Makes the next read fail with [`EngineError::Unavailable`] on its first poll.
    pub fn fail_next_read(&self, reason: impl Into<String>) {
        self.inner.faults.lock().next_read = Some(reason.into());
    }

    /// Waits this long before each append commits.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().commit_delay = delay;
    }

    /// Waits this long after each append commits, before reporting success.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.inner.faults.lock().ack_delay = delay;
    }

    pub fn stream_count(&self) -> usize {
        self.inner.streams.read().len()
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn commit(
        &self,
        stream: &StreamKey,
        expected: ExpectedVersion,
        events: Vec<StoredEvent>,
    ) -> EngineResult<u64> {
        let mut streams = self.inner.streams.write();

        let current = streams.get(stream.as_str()).map_or(0, |s| s.len() as u64);
        if !expected.matches(current) {
            return Err(EngineError::WrongExpectedVersion {
                stream: stream.to_string(),
                expected,
                current,
            });
        }
        if events.is_empty() {
            return Ok(current);
        }

        let entry = streams.entry(stream.as_str().to_owned()).or_default();
        entry.extend(events);
        Ok(entry.len() as u64)
    }
}

struct ReadCursor {
    inner: Arc<Inner>,
    stream: String,
    next: u64,
    through: u64,
}

impl ReadCursor {
    fn step(&mut self) -> Option<EngineResult<StoredRecord>> {
        let streams = self.inner.streams.read();
        let events = streams.get(&self.stream)?;

        if self.next > self.through {
            return None;
        }

        let index = usize::try_from(self.next - 1).ok()?;
        let event = events.get(index)?.clone();
        let record = StoredRecord {
            version: self.next,
            event,
        };
        self.next += 1;
        Some(Ok(record))
    }
}

#[async_trait]
impl StreamEngine for MemoryEngine {
    async fn append_to_stream(
        &self,
        stream: &StreamKey,
        expected: ExpectedVersion,
        events: Vec<StoredEvent>,
    ) -> EngineResult<u64> {
        self.ensure_open()?;

        let (failure, commit_delay, ack_delay) = {
            let mut faults = self.inner.faults.lock();
            (faults.next_append.take(), faults.commit_delay, faults.ack_delay)
        };
        if let Some(reason) = failure {
            return Err(EngineError::Unavailable(reason));
        }

        if let Some(delay) = commit_delay {
            tokio::time::sleep(delay).await;
        }
        let version = self.commit(stream, expected, events)?;
        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(version)
    }

    fn read_stream(
        &self,
        stream: &StreamKey,
        range: VersionRange,
    ) -> BoxStream<'static, EngineResult<StoredRecord>> {
        let inner = Arc::clone(&self.inner);
        let stream = stream.as_str().to_owned();

        let start = move || -> EngineResult<Option<ReadCursor>> {
            if inner.closed.load(Ordering::Acquire) {
                return Err(EngineError::Closed);
            }
            if let Some(reason) = inner.faults.lock().next_read.take() {
                return Err(EngineError::Unavailable(reason));
            }

            let current = inner
                .streams
                .read()
                .get(&stream)
                .map_or(0, |s| s.len() as u64);
            let range = range.clamp(current);
            if range.is_empty() {
                return Ok(None);
            }

            Ok(Some(ReadCursor {
                inner,
                stream,
                next: range.after + 1,
                // Fixed at the first poll: appends that land mid-read are not included.
                through: range.through,
            }))
        };

        stream::once(async move { start() })
            .flat_map(|started| match started {
                Ok(Some(mut cursor)) => {
                    stream::iter(std::iter::from_fn(move || cursor.step())).boxed()
                }
                Ok(None) => stream::empty().boxed(),
                Err(e) => stream::iter([Err(e)]).boxed(),
            })
            .boxed()
    }

    async fn current_version(&self, stream: &StreamKey) -> EngineResult<u64> {
        self.ensure_open()?;
        Ok(self
            .inner
            .streams
            .read()
            .get(stream.as_str())
            .map_or(0, |s| s.len() as u64))
    }

    async fn close(&self) -> EngineResult<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::TryStreamExt;

    use super::*;

    fn event(n: u8) -> StoredEvent {
        StoredEvent::new("test.event", vec![n])
    }

    fn key(raw: &str) -> StreamKey {
        StreamKey::new(raw).unwrap()
    }

    #[tokio::test]
    async fn behaves_like_compare_and_append() {
        let engine = MemoryEngine::new();
        let stream = key("Counter/a");

        assert_eq!(
            engine
                .append_to_stream(&stream, ExpectedVersion::NoStream, vec![event(1)])
                .await
                .unwrap(),
            1
        );
        assert!(matches!(
            engine
                .append_to_stream(&stream, ExpectedVersion::NoStream, vec![event(2)])
                .await,
            Err(EngineError::WrongExpectedVersion { current: 1, .. })
        ));
        assert_eq!(
            engine
                .append_to_stream(&stream, ExpectedVersion::Exact(1), vec![event(2), event(3)])
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn reads_are_fixed_at_their_first_poll() {
        let engine = MemoryEngine::new();
        let stream = key("Counter/b");
        engine
            .append_to_stream(&stream, ExpectedVersion::NoStream, vec![event(1), event(2)])
            .await
            .unwrap();

        let mut reader = engine.read_stream(&stream, VersionRange::new(0, None));
        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.version, 1);

        engine
            .append_to_stream(&stream, ExpectedVersion::Exact(2), vec![event(3)])
            .await
            .unwrap();

        let rest: Vec<_> = reader.try_collect().await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].version, 2);
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let engine = MemoryEngine::new();
        let stream = key("Counter/c");

        engine.fail_next_append("disk on fire");
        assert!(matches!(
            engine
                .append_to_stream(&stream, ExpectedVersion::NoStream, vec![event(1)])
                .await,
            Err(EngineError::Unavailable(reason)) if reason == "disk on fire"
        ));
        engine
            .append_to_stream(&stream, ExpectedVersion::NoStream, vec![event(1)])
            .await
            .unwrap();

        engine.fail_next_read("network partition");
        let mut reader = engine.read_stream(&stream, VersionRange::new(0, None));
        assert!(matches!(
            reader.next().await,
            Some(Err(EngineError::Unavailable(_)))
        ));
        assert!(reader.next().await.is_none());

        let records: Vec<_> = engine
            .read_stream(&stream, VersionRange::new(0, None))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
