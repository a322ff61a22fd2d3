//! Core types, capabilities and invariant engines for Keepsake.
//!
//! This crate owns the group lifecycle rules (membership, join requests and
//! the admin invariant) and the memory-capsule scheduler. It is free of HTTP
//! and database dependencies; the backing store, the local notification
//! subsystem, the attachment area and the clock are all injected.

// Native `async fn` / `impl Future` in traits; the futures are declared `Send`
// explicitly where the store traits need it.
#![allow(async_fn_in_trait)]

pub mod attachment;
pub mod capsule;
pub mod clock;
pub mod error;
pub mod group;
pub mod manager;
pub mod membership;
pub mod memory;
pub mod notify;
pub mod remote;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod fake;

pub use error::{Error, Result};
pub use manager::GroupLifecycleManager;
pub use membership::MembershipView;
pub use remote::CallOptions;
pub use scheduler::CapsuleScheduler;
