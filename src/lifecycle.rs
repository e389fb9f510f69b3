// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! Staged startup and shutdown for components that share a host.
//!
//! Observers subscribe at a numeric stage. [`Lifecycle::start`] walks stages in
//! ascending order and [`Lifecycle::stop`] walks them back down, so a component
//! started late is stopped early.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::log;

/// Well-known stages, lowest first.
pub mod stage {
    pub const FIRST: i32 = i32::MIN;
    pub const RUNTIME_INITIALIZE: i32 = 2000;
    pub const RUNTIME_SERVICES: i32 = 4000;
    pub const RUNTIME_STORAGE_SERVICES: i32 = 6000;
    pub const RUNTIME_ENTITY_SERVICES: i32 = 8000;
    /// Default stage for event stream stores.
    pub const APPLICATION_SERVICES: i32 = 10000;
    pub const BECOME_ACTIVE: i32 = ACTIVE - 1;
    pub const ACTIVE: i32 = 20000;
    pub const LAST: i32 = i32::MAX;
}

#[async_trait]
pub trait LifecycleObserver: Send + Sync {
    async fn on_start(&self, cancel: &CancellationToken) -> Result<()>;

    async fn on_stop(&self, cancel: &CancellationToken) -> Result<()>;
}

struct Subscription {
    name: String,
    stage: i32,
    observer: Arc<dyn LifecycleObserver>,
}

/// Runs subscribed observers stage by stage.
#[derive(Default)]
pub struct Lifecycle {
    subscriptions: Vec<Subscription>,
    // Prefix of `subscriptions` (after sorting) whose on_start succeeded.
    started: usize,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer. Observers sharing a stage run in subscription order.
    pub fn subscribe(
        &mut self,
        name: impl Into<String>,
        stage: i32,
        observer: Arc<dyn LifecycleObserver>,
    ) {
        self.subscriptions.push(Subscription {
            name: name.into(),
            stage,
            observer,
        });
    }

    /// `(name, stage)` of every subscription. Started ones come first, in start order.
    pub fn subscriptions(&self) -> impl Iterator<Item = (&str, i32)> {
        self.subscriptions.iter().map(|s| (s.name.as_str(), s.stage))
    }

    pub fn started(&self) -> usize {
        self.started
    }

    /// Starts every observer that is not running yet, lowest stage first.
    ///
    /// Observers subscribed after an earlier `start` run after the ones already
    /// running, whatever their stage, and stop before them.
    ///
    /// The first failure aborts startup: observers already started are stopped
    /// again in reverse order and the failure is returned.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        // Late subscribers are ordered among themselves; running ones keep their place.
        self.subscriptions[self.started..].sort_by_key(|s| s.stage);

        while self.started < self.subscriptions.len() {
            let subscription = &self.subscriptions[self.started];
            let outcome = if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                log::debug!(
                    observer = %subscription.name,
                    stage = subscription.stage,
                    "Starting lifecycle observer"
                );
                subscription.observer.on_start(cancel).await
            };

            if let Err(e) = outcome {
                log::error!(
                    observer = %subscription.name,
                    stage = subscription.stage,
                    error = %e,
                    "Lifecycle start failed"
                );
                if let Err(_stop_error) = self.stop(cancel).await {
                    log::warn!(error = %_stop_error, "Rollback after failed start was incomplete");
                }
                return Err(e);
            }
            self.started += 1;
        }
        Ok(())
    }

    /// Stops started observers, highest stage first.
    ///
    /// Every started observer gets its `on_stop` call even if an earlier one
    /// fails; the first failure is returned.
    pub async fn stop(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut first_error = None;
        while self.started > 0 {
            self.started -= 1;
            let subscription = &self.subscriptions[self.started];
            log::debug!(
                observer = %subscription.name,
                stage = subscription.stage,
                "Stopping lifecycle observer"
            );
            if let Err(e) = subscription.observer.on_stop(cancel).await {
                log::warn!(observer = %subscription.name, error = %e, "Lifecycle stop failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    struct Recorder {
        name: &'static str,
        journal: Arc<Journal>,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Arc<Journal>) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                fail_start: false,
                fail_stop: false,
            }
        }
    }

    #[async_trait]
    impl LifecycleObserver for Recorder {
        async fn on_start(&self, _cancel: &CancellationToken) -> Result<()> {
            self.journal.0.lock().push(format!("start {}", self.name));
            if self.fail_start {
                return Err(Error::InvalidConfig(self.name.into()));
            }
            Ok(())
        }

        async fn on_stop(&self, _cancel: &CancellationToken) -> Result<()> {
            self.journal.0.lock().push(format!("stop {}", self.name));
            if self.fail_stop {
                return Err(Error::InvalidConfig(self.name.into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn starts_ascending_and_stops_descending() {
        let journal = Arc::new(Journal::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.subscribe("late", stage::ACTIVE, Arc::new(Recorder::new("late", &journal)));
        lifecycle.subscribe(
            "early",
            stage::RUNTIME_SERVICES,
            Arc::new(Recorder::new("early", &journal)),
        );
        lifecycle.subscribe(
            "store",
            stage::APPLICATION_SERVICES,
            Arc::new(Recorder::new("store", &journal)),
        );

        let cancel = CancellationToken::new();
        lifecycle.start(&cancel).await.unwrap();
        lifecycle.stop(&cancel).await.unwrap();

        assert_eq!(
            journal.entries(),
            [
                "start early",
                "start store",
                "start late",
                "stop late",
                "stop store",
                "stop early"
            ]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_observers() {
        let journal = Arc::new(Journal::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.subscribe("a", 1, Arc::new(Recorder::new("a", &journal)));
        lifecycle.subscribe(
            "b",
            2,
            Arc::new(Recorder {
                fail_start: true,
                ..Recorder::new("b", &journal)
            }),
        );
        lifecycle.subscribe("c", 3, Arc::new(Recorder::new("c", &journal)));

        let err = lifecycle.start(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(name) if name == "b"));
        assert_eq!(journal.entries(), ["start a", "start b", "stop a"]);
        assert_eq!(lifecycle.started(), 0);
    }

    #[tokio::test]
    async fn stop_continues_past_failures() {
        let journal = Arc::new(Journal::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.subscribe("a", 1, Arc::new(Recorder::new("a", &journal)));
        lifecycle.subscribe(
            "b",
            2,
            Arc::new(Recorder {
                fail_stop: true,
                ..Recorder::new("b", &journal)
            }),
        );

        let cancel = CancellationToken::new();
        lifecycle.start(&cancel).await.unwrap();
        let err = lifecycle.stop(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(name) if name == "b"));
        assert!(journal.entries().ends_with(&["stop b".into(), "stop a".into()]));
    }

    #[tokio::test]
    async fn late_subscribers_start_by_stage() {
        let journal = Arc::new(Journal::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.subscribe("first", 3, Arc::new(Recorder::new("first", &journal)));

        let cancel = CancellationToken::new();
        lifecycle.start(&cancel).await.unwrap();
        lifecycle.subscribe("later", 5, Arc::new(Recorder::new("later", &journal)));
        lifecycle.subscribe("sooner", 1, Arc::new(Recorder::new("sooner", &journal)));
        lifecycle.start(&cancel).await.unwrap();
        assert_eq!(lifecycle.started(), 3);
        lifecycle.stop(&cancel).await.unwrap();

        assert_eq!(
            journal.entries(),
            [
                "start first",
                "start sooner",
                "start later",
                "stop later",
                "stop sooner",
                "stop first"
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_start_runs_nothing() {
        let journal = Arc::new(Journal::default());
        let mut lifecycle = Lifecycle::new();
        lifecycle.subscribe("a", 1, Arc::new(Recorder::new("a", &journal)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            lifecycle.start(&cancel).await,
            Err(Error::Cancelled)
        ));
        assert!(journal.entries().is_empty());
    }
}
