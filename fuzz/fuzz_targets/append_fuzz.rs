#![no_main]

// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rkyv::{Archive, Deserialize, Serialize};
use stranddb::{EventRegistry, EventStreamStore, EventType, MemoryEngine, StoreOptions, StreamKey};

#[derive(Archive, Serialize, Deserialize, Debug, Arbitrary, Clone)]
struct FuzzEvent {
    id: u32,
    data: Vec<u8>,
}

impl EventType for FuzzEvent {
    const EVENT_TYPE: &'static str = "fuzz.event";
}

#[derive(Arbitrary, Debug)]
struct FuzzAppend {
    stream: String,
    expected_version: u64,
    events: Vec<FuzzEvent>,
}

fuzz_target!(|appends: Vec<FuzzAppend>| {
    let Ok(rt) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    let mut registry = EventRegistry::new();
    if registry.register::<FuzzEvent>().is_err() {
        return;
    }
    let store = EventStreamStore::new(
        StoreOptions::new("fuzz").with_memory(MemoryEngine::new()),
        registry,
    );

    rt.block_on(async {
        if store.init().await.is_err() {
            return;
        }
        for append in appends {
            let Ok(stream) = StreamKey::new(append.stream) else {
                continue;
            };
            let before = store.current_version(&stream).await.unwrap_or(0);
            let accepted = store
                .append(&stream, &append.events[..], append.expected_version)
                .await;
            let after = store.current_version(&stream).await.unwrap_or(0);

            // Only an accepted append moves the version, by exactly its batch.
            match accepted {
                Ok(true) => assert_eq!(after, before + append.events.len() as u64),
                _ => assert_eq!(after, before),
            }
        }
    });
});
