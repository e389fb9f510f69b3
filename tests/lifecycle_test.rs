mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{registry, Incremented};
use parking_lot::Mutex;
use rstest::{fixture, rstest};
use stranddb::{
    stage, Error, EventStreamStore, Lifecycle, LifecycleObserver, MemoryEngine, StoreOptions,
    StoreState, StreamKey,
};
use tokio_util::sync::CancellationToken;

/// Records when it runs, and whether the store was ready at that moment.
struct Witness {
    store: Arc<EventStreamStore>,
    seen: Mutex<Vec<(&'static str, StoreState)>>,
}

#[async_trait]
impl LifecycleObserver for Witness {
    async fn on_start(&self, _cancel: &CancellationToken) -> stranddb::Result<()> {
        self.seen.lock().push(("start", self.store.state()));
        Ok(())
    }

    async fn on_stop(&self, _cancel: &CancellationToken) -> stranddb::Result<()> {
        self.seen.lock().push(("stop", self.store.state()));
        Ok(())
    }
}

#[fixture]
fn store() -> Arc<EventStreamStore> {
    Arc::new(EventStreamStore::new(
        StoreOptions::new("Default").with_memory(MemoryEngine::new()),
        registry(),
    ))
}

#[rstest]
#[tokio::test]
async fn host_lifecycle_drives_the_store(store: Arc<EventStreamStore>) {
    let witness = Arc::new(Witness {
        store: Arc::clone(&store),
        seen: Mutex::new(Vec::new()),
    });

    let mut lifecycle = Lifecycle::new();
    lifecycle.subscribe("entities", stage::ACTIVE, witness.clone());
    store.participate(&mut lifecycle);

    let names: Vec<_> = lifecycle.subscriptions().map(|(name, _)| name).collect();
    assert_eq!(names, ["entities", "EventStreamStore-Default"]);

    let cancel = CancellationToken::new();
    lifecycle.start(&cancel).await.unwrap();
    let stream = StreamKey::new("Counter/abc").unwrap();
    assert!(store.append(&stream, &[Incremented { amount: 1 }], 0).await.unwrap());
    lifecycle.stop(&cancel).await.unwrap();

    // The store starts before, and stops after, anything at a later stage.
    assert_eq!(
        *witness.seen.lock(),
        [("start", StoreState::Ready), ("stop", StoreState::Ready)]
    );
    assert_eq!(store.state(), StoreState::Closed);
}

#[rstest]
#[tokio::test]
async fn operations_outside_ready_fail_deterministically(store: Arc<EventStreamStore>) {
    let stream = StreamKey::new("Counter/abc").unwrap();

    for _ in 0..2 {
        assert!(matches!(
            store.append(&stream, &[Incremented { amount: 1 }], 0).await,
            Err(Error::NotReady {
                state: StoreState::Uninitialized
            })
        ));
        assert!(matches!(
            store.read::<Incremented>(&stream, 0, None),
            Err(Error::NotReady {
                state: StoreState::Uninitialized
            })
        ));
    }

    store.init().await.unwrap();
    store.close().await.unwrap();

    assert!(matches!(
        store.append(&stream, &[Incremented { amount: 1 }], 0).await,
        Err(Error::NotReady {
            state: StoreState::Closed
        })
    ));
    assert!(matches!(
        store.current_version(&stream).await,
        Err(Error::NotReady {
            state: StoreState::Closed
        })
    ));
    store.close().await.unwrap();
}

#[rstest]
#[tokio::test]
async fn failed_init_stops_the_host_start(#[from(store)] healthy: Arc<EventStreamStore>) {
    let broken = Arc::new(EventStreamStore::new(StoreOptions::new("broken"), registry()));

    let mut lifecycle = Lifecycle::new();
    healthy.participate(&mut lifecycle);
    broken.participate(&mut lifecycle);

    let err = lifecycle.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Initialization { ref name, .. } if name == "broken"));
    assert_eq!(broken.state(), StoreState::Closed);
    // Rolled back: the store that did start was closed again.
    assert_eq!(healthy.state(), StoreState::Closed);
}

#[rstest]
#[tokio::test]
async fn reads_polled_after_close_fail(store: Arc<EventStreamStore>) {
    store.init().await.unwrap();
    let stream = StreamKey::new("Counter/abc").unwrap();
    assert!(store
        .append(&stream, &[Incremented { amount: 1 }], 0)
        .await
        .unwrap());

    let reader = store.read::<Incremented>(&stream, 0, None).unwrap();
    store.close().await.unwrap();

    // The engine is closed by the time the read is first polled.
    let err = reader.collect_records().await.unwrap_err();
    assert!(matches!(err, Error::StorageUnavailable(_)));
    // Retrying cannot reopen the store.
    assert!(!err.is_transient());
}
