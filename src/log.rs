// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

// ---------------------------------------- //
// Macros
// ---------------------------------------- //

// Crate-internal logging. Each macro forwards to `tracing` when the `log`
// feature is on and expands to nothing otherwise.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::tracing::trace!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::tracing::debug!($($arg)*);
    }};
}

// `warn` alone clashes with the built-in lint attribute on re-export.
macro_rules! warn_ {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::tracing::warn!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::tracing::error!($($arg)*);
    }};
}

#[allow(unused_imports)]
pub(crate) use {debug, error, trace, warn_ as warn};

// ---------------------------------------- //
// Error
// ---------------------------------------- //

#[cfg(feature = "log")]
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error(transparent)]
    SetLogger(#[from] tracing_subscriber::util::TryInitError),
}

#[cfg(feature = "log")]
pub type LogResult<T> = Result<T, LogError>;

// ---------------------------------------- //
// Log
// ---------------------------------------- //

/// Installs a compact global subscriber filtered by `filter` (`EnvFilter` syntax).
///
/// Falls back to `info` when the filter does not parse.
#[cfg(feature = "log")]
pub fn init(filter: impl AsRef<str>) -> LogResult<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_new(filter.as_ref()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true),
        )
        .try_init()
        .map_err(Into::into)
}

// ---------------------------------------- //
// Test
// ---------------------------------------- //

#[cfg(all(test, feature = "log"))]
pub mod test {
    #[rstest::fixture]
    pub fn log_init() {
        // A second subscriber in the same test binary is not an error here.
        let _ = super::init("stranddb=trace,info");
    }

    #[rstest::rstest]
    fn macros_accept_structured_fields(#[from(log_init)] _log: ()) {
        let stream = "Counter/abc";
        crate::log::debug!(stream, version = 3u64, "appended");
        crate::log::trace!("read {} records", 2);
        crate::log::warn!(stream, error = "injected", "append failed");
    }
}
