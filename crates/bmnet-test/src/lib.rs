//! Test infrastructure for the bare-metal network agent
//!
//! Provides:
//! - Node and port fixtures, and [`TestEnv`] wiring store, locks and fakes
//! - [`FakeController`], an in-memory controller with failure injection
//! - [`RecordingPlumber`], a link plumber that records every step
//! - Verification helpers for stored VIF state and plumbing order

pub mod fakes;
pub mod fixtures;
mod verification;

pub use fakes::{ControllerCall, ControllerOp, FailureKind, FakeController, PlumbOp, RecordingPlumber};
pub use fixtures::*;
pub use verification::*;
