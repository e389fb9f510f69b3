// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! Utility macros and helpers for StrandDB.

/// Times the execution of a block and invokes a callback with the label and elapsed duration.
///
/// The block's value is returned unchanged, so fallible blocks keep working with `?`
/// on the result:
///
/// ```ignore
/// let engine = timed!("connect", |label, elapsed| log_elapsed(label, elapsed), {
///     connector.connect().await
/// })?;
/// ```
macro_rules! timed {
    ($label:expr, $callback:expr, $block:expr) => {{
        let __timed_start = ::std::time::Instant::now();
        let __timed_result = $block;
        ($callback)($label, __timed_start.elapsed());
        __timed_result
    }};
}

pub(crate) use timed;

/// Formats a duration as milliseconds with two decimals, e.g. `"12.34"`.
#[cfg_attr(not(feature = "log"), allow(dead_code))]
pub(crate) fn millis(elapsed: std::time::Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64() * 1000.0)
}
