#![doc = include_str!("../README.md")]

// Core modules
pub mod backend;
pub mod cache;
pub mod errors;
pub mod global;
pub mod guard;
pub mod key;
mod log_utils;
pub mod platform;
pub mod refresh;
pub mod runtime;
pub mod single_flight;
pub mod state;
pub mod subscription;
pub mod types;

// Storefront domain
pub mod cart;
pub mod checkout;
pub mod config;
pub mod models;
pub mod resources;
pub mod storage;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "dioxus")]
pub mod hooks;

// Re-export commonly used items at crate root for convenience
pub use errors::{SyncError, SyncResult};
pub use runtime::SyncRuntime;

pub mod prelude {
    //! The prelude exports the types most applications need.

    // Runtime and configuration
    pub use crate::config::{ResourcePolicies, ResourcePolicy, SyncConfig};
    pub use crate::global;
    pub use crate::runtime::{AuthEvent, SyncRuntime};
    pub use crate::storage::{ClientStorage, FileStore, MemoryStore, PersistentStore};

    // Subscriptions and their state
    pub use crate::key::{KeyBuilder, ResourceKey};
    pub use crate::state::{AsyncState, Snapshot, Status};
    pub use crate::subscription::{SubscribeOptions, Subscription};
    pub use crate::types::Fetcher;

    // Backend interface and storefront resources
    pub use crate::backend::StorefrontApi;
    pub use crate::models::*;
    pub use crate::resources::{
        subscribe_dashboard, subscribe_predictions, subscribe_product_prediction,
        subscribe_stock_alerts,
    };

    // Cart and checkout
    pub use crate::cart::{CartState, CartStore};
    pub use crate::checkout::{
        CheckoutLifecycle, CheckoutRedirect, CheckoutState, DisplayedOrder, ProviderReturn,
    };

    // Error types
    pub use crate::errors::{CheckoutError, ErrorKind, StorageError, SyncError, SyncResult};

    #[cfg(feature = "http")]
    pub use crate::http::{HttpConfig, HttpStorefront};

    #[cfg(feature = "dioxus")]
    pub use crate::hooks::use_subscription;
}
