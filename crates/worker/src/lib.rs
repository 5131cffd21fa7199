//! Background execution primitives.
//!
//! This crate centralizes the keyed work queue and the dedicated worker
//! thread used by subsystems that schedule per-file background work.

mod executor;
mod queue;
mod spawn;

pub use executor::BackgroundExecutor;
pub use queue::{Offer, SetQueue};
pub use spawn::spawn_named_thread;
