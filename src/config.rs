// This file is part of StrandDB.
//
// Copyright (C) 2025 Matheus Cardoso <varvedb@matheus.sbs>
//
// This Source Code Form is subject to the terms of the Mozilla Public License
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at http://mozilla.org/MPL/2.0/.

//! Store options and the connectors that build engines.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::constants;
use crate::engine::{LmdbConfig, LmdbEngine, MemoryEngine, StreamEngine};
use crate::error::{BoxError, Error, Result};
use crate::lifecycle::stage;

/// Builds the engine a store talks to. Called once, from `init`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> std::result::Result<Arc<dyn StreamEngine>, BoxError>;
}

/// Opens an LMDB environment.
#[derive(Debug, Clone)]
pub struct LmdbConnector {
    pub config: LmdbConfig,
}

impl LmdbConnector {
    pub fn new(config: LmdbConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for LmdbConnector {
    async fn connect(&self) -> std::result::Result<Arc<dyn StreamEngine>, BoxError> {
        self.config.validate()?;
        let engine = LmdbEngine::open_async(self.config.clone()).await?;
        Ok(Arc::new(engine))
    }
}

/// Hands out a shared [`MemoryEngine`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    pub engine: MemoryEngine,
}

impl MemoryConnector {
    pub fn new(engine: MemoryEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> std::result::Result<Arc<dyn StreamEngine>, BoxError> {
        Ok(Arc::new(self.engine.clone()))
    }
}

/// Adapts an async closure into a [`Connector`].
pub struct FnConnector<F>(pub F);

#[async_trait]
impl<F, Fut> Connector for FnConnector<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Arc<dyn StreamEngine>, BoxError>> + Send,
{
    async fn connect(&self) -> std::result::Result<Arc<dyn StreamEngine>, BoxError> {
        (self.0)().await
    }
}

/// Options for one named [`EventStreamStore`](crate::store::EventStreamStore).
#[derive(Clone)]
pub struct StoreOptions {
    /// Name of the store; several stores can live in one host.
    pub name: String,
    /// Identifies the hosting service in logs.
    pub service_id: String,
    /// Lifecycle stage at which the store initializes. See [`stage`].
    pub init_stage: i32,
    /// Builds the engine. Required.
    pub connector: Option<Arc<dyn Connector>>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_STORE_NAME.to_string(),
            service_id: String::from("default"),
            init_stage: stage::APPLICATION_SERVICES,
            connector: None,
        }
    }
}

impl StoreOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn with_lmdb(self, config: LmdbConfig) -> Self {
        self.with_connector(LmdbConnector::new(config))
    }

    pub fn with_memory(self, engine: MemoryEngine) -> Self {
        self.with_connector(MemoryConnector::new(engine))
    }

    pub fn with_init_stage(mut self, stage: i32) -> Self {
        self.init_stage = stage;
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("store name cannot be empty".into()));
        }
        if self.connector.is_none() {
            return Err(Error::InvalidConfig(format!(
                "Configuration for event stream store {} is invalid. A connector must be configured.",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("name", &self.name)
            .field("service_id", &self.service_id)
            .field("init_stage", &self.init_stage)
            .field("connector", &self.connector.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_without_a_connector_are_invalid() {
        let err = StoreOptions::new("counters").validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(msg) if msg.contains("counters")));
    }

    #[test]
    fn defaults_initialize_with_application_services() {
        let options = StoreOptions::default().with_memory(MemoryEngine::new());
        assert_eq!(options.init_stage, stage::APPLICATION_SERVICES);
        assert_eq!(options.name, constants::DEFAULT_STORE_NAME);
        assert!(options.validate().is_ok());
    }

    #[tokio::test]
    async fn closures_can_act_as_connectors() {
        let engine = MemoryEngine::new();
        let shared = engine.clone();
        let connector = FnConnector(move || {
            let engine = shared.clone();
            async move { Ok(Arc::new(engine) as Arc<dyn StreamEngine>) }
        });

        connector.connect().await.unwrap();
        assert_eq!(engine.stream_count(), 0);
    }

    #[tokio::test]
    async fn lmdb_connector_validates_before_opening() {
        let connector = LmdbConnector::new(LmdbConfig {
            read_buffer: 0,
            ..LmdbConfig::new("unused")
        });
        let err = connector.connect().await.err().unwrap();
        assert!(err.to_string().contains("read_buffer"));
    }
}
