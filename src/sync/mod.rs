//! Sync Reconciler
//!
//! Store-and-forward reconciliation of data files across a radio hop:
//! - Inventory exchange (`rsync list` / `rsync files`)
//! - Planning by modification time under a [`ReplacePolicy`](crate::core::ReplacePolicy)
//! - Sequential file pull (`rsync <path>`) with per-file timeouts

mod inventory;
mod message;
mod reconciler;

pub use inventory::*;
pub use message::*;
pub use reconciler::*;
