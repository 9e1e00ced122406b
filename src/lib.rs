//! Stash: debounced persistence of in-memory values
//!
//! A value lives in memory, can be changed as often as needed, and is written
//! to its backing file only after the binding has been idle for a while.
//!
//! ```no_run
//! use stash::{DeclareOptions, Store, StoreConfig};
//!
//! # async fn demo() -> stash::Result<()> {
//! let config = StoreConfig::new().unwrap_or_default();
//! let store = Store::new(config)?;
//! let launches = store.declare("launches", 0u64, DeclareOptions::default())?;
//! launches.update(|n| n + 1)?;
//! store.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StashError};
pub use registry::{sanitize_file_name, BindingAttrs, Registry};
pub use scheduler::{IdleScheduler, ManualScheduler, TimerHandle, TokioScheduler};
pub use store::{decode_first, encode, DeclareOptions, PendingWrite, Stash, Store, WriteDelay};
