//! Debounced store
//!
//! This module holds the in-memory values of registered bindings and decides
//! when they reach disk: synchronously for immediate or undelayed bindings,
//! otherwise once the binding has been idle for its write delay. It also
//! provides typed handles created through `Store::declare`.

mod codec;
mod debounced;
mod handle;

pub use codec::{decode_first, encode};
pub use debounced::{PendingWrite, Store};
pub use handle::{DeclareOptions, Stash, WriteDelay};
