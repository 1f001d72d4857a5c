pub mod audio;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod player;
pub mod profiles;
pub mod queue;
pub mod scheduler;
pub mod segment;
pub mod session;
pub mod transcoder;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, carrying on with the inner value if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
