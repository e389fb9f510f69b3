// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

pub const STREAMS_DB_NAME: &str = "streams";
pub const EVENTS_DB_NAME: &str = "events";

pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024; // 1 GiB
pub const DEFAULT_MAX_DBS: u32 = 2;
pub const DEFAULT_MAX_READERS: u32 = 126;

/// Records fetched per read transaction by the LMDB read producer.
pub const DEFAULT_READ_BATCH_SIZE: usize = 256;
/// Capacity of the channel between a read producer and its consumer.
pub const DEFAULT_READ_BUFFER: usize = 64;

/// Separates the entity kind from the instance key in a stream key.
pub const STREAM_KEY_SEPARATOR: char = '/';
/// Longest stream key in bytes. LMDB's default `MDB_MAXKEYSIZE`.
pub const MAX_STREAM_KEY_LEN: usize = 511;

pub const STORE_NAME_PREFIX: &str = "EventStreamStore";
pub const DEFAULT_STORE_NAME: &str = "Default";

pub const ENV_PATH: &str = "STRANDDB_PATH";
pub const ENV_MAP_SIZE: &str = "STRANDDB_MAP_SIZE";
