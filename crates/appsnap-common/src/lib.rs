//! Shared types for application data snapshots.
//!
//! This crate provides:
//! - Identity newtypes (`SetId`, `Revision`) with stable text forms
//! - The `Epoch` descriptor carried in snapshot metadata
//! - `AppInfo`, the description of an installed application
//! - `CancelToken`, the cancellation signal every long operation polls

pub mod app;
pub mod cancel;
pub mod epoch;
pub mod id;

pub use app::AppInfo;
pub use cancel::{CancelToken, Cancelled};
pub use epoch::{Epoch, EpochParseError};
pub use id::{Revision, RevisionParseError, SetId};
