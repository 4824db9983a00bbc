//! In-process backends.
//!
//! [`MemoryDataService`] answers queries over entities saved into it and
//! pushes change events to its live subscribers; [`MemoryCache`] keeps
//! pinned entities per query key. Both support failure injection so the
//! sync machinery can be driven through its error paths.

mod cache;
mod service;

pub use cache::{CacheSnapshot, MemoryCache, CACHE_FORMAT_VERSION};
pub use service::MemoryDataService;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
