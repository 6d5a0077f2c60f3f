//! Thin re-exports over `parking_lot` so call sites read like the stdlib
//! while getting non-poisoning, faster locks.

pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
