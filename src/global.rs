//! # Process-wide runtime
//!
//! One [`SyncRuntime`] per process (tab) owns the cache. This module holds it behind
//! an explicit lifecycle: [`init`] at startup, [`runtime`] to access it, and
//! [`shutdown`] to stop its background tasks and release it. Tests and embedders that
//! need several runtimes can construct [`SyncRuntime`] directly instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use storefront_sync::{config::SyncConfig, global, storage::ClientStorage};
//!
//! #[tokio::main]
//! async fn main() {
//!     global::init(SyncConfig::default(), ClientStorage::in_memory())
//!         .expect("runtime already initialized");
//!
//!     let runtime = global::runtime().expect("initialized above");
//!     // ... subscribe, build the cart store, run the app
//! #   let _ = runtime;
//!
//!     global::shutdown();
//! }
//! ```

use std::sync::RwLock;

use crate::{config::SyncConfig, runtime::SyncRuntime, storage::ClientStorage};

/// Error type for global runtime operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlobalError {
    #[error("Global runtime not initialized. Call global::init() first.")]
    NotInitialized,
    #[error("Global runtime already initialized. Call global::shutdown() before re-initializing.")]
    AlreadyInitialized,
    #[error("Global runtime lock poisoned")]
    Poisoned,
}

static GLOBAL_RUNTIME: RwLock<Option<SyncRuntime>> = RwLock::new(None);

/// Initialize the process-wide runtime and start cache maintenance.
///
/// Must be called from within a tokio runtime when maintenance is enabled.
pub fn init(config: SyncConfig, storage: ClientStorage) -> Result<SyncRuntime, GlobalError> {
    let mut slot = GLOBAL_RUNTIME.write().map_err(|_| GlobalError::Poisoned)?;
    if slot.is_some() {
        return Err(GlobalError::AlreadyInitialized);
    }

    let runtime = SyncRuntime::new(config, storage);
    runtime.start_maintenance();
    *slot = Some(runtime.clone());
    crate::debug_log!("Global runtime initialized");
    Ok(runtime)
}

/// Get the process-wide runtime.
pub fn runtime() -> Result<SyncRuntime, GlobalError> {
    GLOBAL_RUNTIME
        .read()
        .map_err(|_| GlobalError::Poisoned)?
        .clone()
        .ok_or(GlobalError::NotInitialized)
}

/// Check if the global runtime has been initialized
pub fn is_initialized() -> bool {
    GLOBAL_RUNTIME
        .read()
        .map(|slot| slot.is_some())
        .unwrap_or(false)
}

/// Stop every background task of the global runtime and release it.
///
/// Returns false if no runtime was initialized. Handles obtained earlier keep
/// working, but their pollers are stopped.
pub fn shutdown() -> bool {
    let taken = match GLOBAL_RUNTIME.write() {
        Ok(mut slot) => slot.take(),
        Err(_) => return false,
    };
    match taken {
        Some(runtime) => {
            runtime.shutdown();
            crate::debug_log!("Global runtime released");
            true
        }
        None => false,
    }
}
