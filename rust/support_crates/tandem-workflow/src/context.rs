//! Explicitly owned runtime scope.

use std::sync::Arc;

use tandem_common::{Configuration, Result};

use crate::signal::CancellationToken;

/// Configuration and shutdown scope shared by the components of one runtime.
///
/// There is no global runtime state: every component is created from a context (or from
/// explicit parameters), and each receives a child of the context's shutdown token. Calling
/// [`shutdown`](Self::shutdown) cancels all of them at once, while a component stopping
/// itself leaves its siblings running.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    config: Arc<Configuration>,
    shutdown: CancellationToken,
}

impl RuntimeContext {
    /// Validates `config` and creates a fresh scope around it.
    pub fn new(config: Configuration) -> Result<RuntimeContext> {
        config.validate()?;
        Ok(RuntimeContext {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// A token cancelled when this context shuts down. Cancelling it does not shut the
    /// context down.
    pub fn child_token(&self) -> CancellationToken {
        self.shutdown.child()
    }

    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            log::debug!("runtime context shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        RuntimeContext {
            config: Arc::new(Configuration::default()),
            shutdown: CancellationToken::new(),
        }
    }
}
