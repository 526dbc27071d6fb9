//! Common infrastructure for the bare-metal network attachment agent.
//!
//! This crate provides the pieces every other `bmnet` crate builds on:
//!
//! - [`model`]: nodes, physical ports, portgroups and the VIF keys stored on them
//! - [`error`]: the [`NetError`] taxonomy shared by every layer
//! - [`shell`]: command execution with proper quoting, used by the link plumber
//! - [`store`]: the object store and per-node lock seams, plus an in-memory store
//! - [`task`]: [`Task`], the locked view of one node handed to network operations
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bmnet_common::{LocalLockManager, MemoryStore, Task};
//!
//! let store = Arc::new(MemoryStore::new());
//! let locks = LocalLockManager::new();
//! let task = Task::acquire(store, &locks, "1be26c0b-03f2-4d2e-ae87-c02d7f33c123").await?;
//! for port in task.pxe_enabled_ports() {
//!     println!("{} {}", port.id, port.address);
//! }
//! ```

pub mod error;
pub mod model;
pub mod shell;
pub mod store;
pub mod task;

// Re-export commonly used items at crate root
pub use error::{NetError, NetResult};
pub use model::{
    keys, LocalLinkConnection, NetworkPhase, Node, PhysicalPort, PortGroup, VifInfo,
};
pub use store::{Inventory, LocalLockManager, LockManager, MemoryStore, NodeLock, NodeStore};
pub use task::Task;
