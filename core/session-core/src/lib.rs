//! # session-core
//!
//! Shared session state for marketplace plugin hooks.
//!
//! Every hook the host spawns is its own short-lived process, but all hooks of
//! one root process share a single JSON document on disk. This crate owns that
//! document and the discipline around it.
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime; the only blocking point is the lock wait.
//! - **One lock cycle per operation**: read, modify and write happen under one
//!   `flock`, and the guard is released on every exit path.
//! - **Never silently reset**: a corrupt document is an error, not an empty store.
//! - **Explicit context**: plugin, hook and session key travel in [`HookContext`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use session_core::{run_hook, HookConfig, HookContext, HookResponse};
//!
//! let ctx = HookContext::new("swift-lint", "PostToolUse", HookConfig::from_env());
//! let rendered = run_hook(ctx, &|ctx: &mut HookContext| {
//!     if ctx.show_once("prefer-observable")? {
//!         return Ok(HookResponse::inject("Prefer @Observable over ObservableObject."));
//!     }
//!     Ok(HookResponse::allow())
//! }, std::io::stdin());
//! ```

pub mod config;
pub mod error;
pub mod journal;
pub mod lifecycle;
pub mod lock;
pub mod response;
pub mod storage;
pub mod store;
pub mod trackers;
pub mod types;

pub use config::{HookConfig, KeySource};
pub use error::{Result, SessionError};
pub use journal::{ErrorJournal, JournalEntry, Level};
pub use lifecycle::{
    parse_hook_input, run_hook, FailurePolicy, Hook, HookContext, LifecycleState,
};
pub use lock::{LockGuard, LockManager, LockPolicy};
pub use response::{Decision, Dialect, HookEvent, HookResponse, RenderedResponse};
pub use storage::StorageConfig;
pub use store::SessionStore;
pub use trackers::{RecommendationTracker, ValidationTracker};
pub use types::{FlagTable, PluginState, SessionDocument, SessionKey};
