#![no_main]

// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.
use libfuzzer_sys::fuzz_target;
use rkyv::{Archive, Deserialize, Serialize};
use stranddb::model::StoredEvent;
use stranddb::{EventRegistry, EventType};

#[derive(Archive, Serialize, Deserialize, Debug)]
struct FuzzEvent {
    id: u32,
    data: Vec<u8>,
}

impl EventType for FuzzEvent {
    const EVENT_TYPE: &'static str = "fuzz.event";
}

fuzz_target!(|data: &[u8]| {
    let mut registry = EventRegistry::new();
    if registry.register::<FuzzEvent>().is_err() {
        return;
    }

    // A corrupted envelope must be rejected, never trusted.
    if let Ok(stored) = StoredEvent::from_bytes(data) {
        let _ = registry.decode(&stored);
    }

    // Same for a valid envelope around a corrupted payload.
    let _ = registry.decode(&StoredEvent::new(FuzzEvent::EVENT_TYPE, data.to_vec()));
});
