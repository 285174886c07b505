//! Handler runtimes and their factories.

pub mod exec;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ENGINE_QUEUE_SIZE;
use crate::config::HandlerConfig;
use crate::error::Result;

/// Conversation-side half of the engine queue pair.
pub struct EngineQueues {
    /// Lines destined for the handler's stdin.
    pub input: mpsc::Sender<String>,
    /// Lines produced on the handler's stdout.
    pub output: mpsc::Receiver<String>,
}

/// Engine-side half of the engine queue pair. Dropping it closes both
/// queues, which is how downstream readers learn the engine is gone.
pub struct EngineEndpoint {
    pub input: mpsc::Receiver<String>,
    pub output: mpsc::Sender<String>,
}

impl EngineQueues {
    /// Build the bounded queue pair linking a conversation to its engine.
    pub fn new() -> (EngineQueues, EngineEndpoint) {
        let (in_tx, in_rx) = mpsc::channel(ENGINE_QUEUE_SIZE);
        let (out_tx, out_rx) = mpsc::channel(ENGINE_QUEUE_SIZE);
        (
            EngineQueues {
                input: in_tx,
                output: out_rx,
            },
            EngineEndpoint {
                input: in_rx,
                output: out_tx,
            },
        )
    }
}

/// A handler runtime. `run` consumes the engine and drives it to
/// completion; returning (on any path) releases the engine endpoint and so
/// closes the engine queues.
#[async_trait]
pub trait Engine: Send {
    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<()>;
}

/// Builds engines for one handler config.
///
/// Creation must not start anything: a registration race discards the
/// freshly created engine without side effects.
pub trait EngineFactory: Send + Sync {
    fn config(&self) -> &HandlerConfig;
    fn create(
        &self,
        env: HashMap<String, String>,
        endpoint: EngineEndpoint,
    ) -> Box<dyn Engine>;
}

/// Turns a handler config into a factory for one engine kind.
pub trait FactoryLoader: Send + Sync {
    fn load(&self, config: HandlerConfig) -> Arc<dyn EngineFactory>;
}

/// Registry from engine-kind name to factory loader. Future non-exec
/// engines plug in here without touching the manager.
pub struct EngineRegistry {
    loaders: RwLock<HashMap<String, Box<dyn FactoryLoader>>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            loaders: RwLock::new(HashMap::new()),
        }
    }

    /// Registry seeded with the built-in engine kinds.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.register("executable", Box::new(exec::ExecFactoryLoader));
        registry
    }

    pub fn register(&self, kind: &str, loader: Box<dyn FactoryLoader>) {
        self.loaders
            .write()
            .expect("registry lock poisoned")
            .insert(kind.to_string(), loader);
    }

    /// Resolve a config to a factory, or `None` for an unknown engine kind.
    pub fn factory_for(&self, config: HandlerConfig) -> Option<Arc<dyn EngineFactory>> {
        let loaders = self.loaders.read().expect("registry lock poisoned");
        loaders.get(&config.engine).map(|loader| loader.load(config))
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
