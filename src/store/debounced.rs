//! Debounced write-through store
//!
//! Provides a `Store` that holds the current value of every registered binding
//! in memory and flushes it to the binding's backing file either right away or
//! after an idle delay. Each binding has at most one armed timer; a new `set`
//! cancels and replaces it, so a burst of updates costs a single write.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use super::codec;
use crate::config::StoreConfig;
use crate::error::{Result, StashError};
use crate::registry::{BindingAttrs, Registry};
use crate::scheduler::{IdleScheduler, TimerHandle, TokioScheduler};

/// An outstanding debounced save for one binding
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Binding the save belongs to
    pub name: String,
    /// When the timer was (re)armed
    pub armed_at: DateTime<Utc>,
    /// When the timer is expected to fire
    pub fires_at: DateTime<Utc>,
}

struct ArmedTimer {
    generation: u64,
    timer: Box<dyn TimerHandle>,
    info: PendingWrite,
}

struct State {
    registry: Registry,
    values: HashMap<String, Value>,
    pending: HashMap<String, ArmedTimer>,
    next_generation: u64,
}

struct Shared {
    state: Mutex<State>,
    scheduler: Arc<dyn IdleScheduler>,
    default_delay: Duration,
    create_missing_dirs: bool,
}

/// Registry plus current values plus per-binding idle timers
///
/// Cloning a `Store` yields another handle to the same bindings.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Creates a store whose timers run on the current tokio runtime
    ///
    /// # Returns
    /// * `Ok(Store)` when called from within a tokio runtime
    /// * `Err(StashError::NoRuntime)` otherwise
    pub fn new(config: StoreConfig) -> Result<Self> {
        let scheduler = TokioScheduler::try_current()?;
        Ok(Self::with_scheduler(config, Arc::new(scheduler)))
    }

    /// Creates a store driven by a caller-supplied scheduler
    pub fn with_scheduler(config: StoreConfig, scheduler: Arc<dyn IdleScheduler>) -> Self {
        let state = State {
            registry: Registry::new(config.base_dir),
            values: HashMap::new(),
            pending: HashMap::new(),
            next_generation: 0,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                scheduler,
                default_delay: config.default_delay,
                create_missing_dirs: config.create_missing_dirs,
            }),
        }
    }

    /// Registers (or re-registers) a binding's metadata
    ///
    /// A binding seen for the first time starts out holding `default_value`.
    /// Re-registration leaves the current value alone.
    pub fn register(
        &self,
        name: &str,
        file: impl Into<PathBuf>,
        default_value: Value,
        write_delay: Option<Duration>,
    ) -> String {
        let mut state = self.shared.state.lock();
        if !state.values.contains_key(name) {
            state.values.insert(name.to_string(), default_value.clone());
        }
        state.registry.register(name, file, default_value, write_delay)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.shared.state.lock().registry.contains(name)
    }

    /// Registered binding names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.shared.state.lock().registry.names()
    }

    pub fn attributes_of(&self, name: &str) -> Result<BindingAttrs> {
        self.shared.state.lock().registry.attributes_of(name).cloned()
    }

    pub fn resolved_file(&self, name: &str) -> Result<PathBuf> {
        self.shared.state.lock().registry.resolved_file(name)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.shared.state.lock().registry.base_dir().to_path_buf()
    }

    /// Changes the directory relative binding files resolve against
    ///
    /// Bindings registered with absolute paths (everything created through
    /// `declare`) keep their files where they are.
    pub fn set_base_dir(&self, base_dir: PathBuf) {
        self.shared.state.lock().registry.set_base_dir(base_dir);
    }

    pub(crate) fn default_delay(&self) -> Duration {
        self.shared.default_delay
    }

    /// Returns the current in-memory value. Never touches the disk.
    pub fn get(&self, name: &str) -> Result<Value> {
        let state = self.shared.state.lock();
        state
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| StashError::UnknownBinding(name.to_string()))
    }

    /// Updates the in-memory value and schedules or performs the write
    ///
    /// # Arguments
    /// * `name` - The registered binding
    /// * `value` - The new value, visible to `get` as soon as this returns
    /// * `immediate` - Write synchronously even if the binding has a delay
    ///
    /// # Returns
    /// * `Ok(Value)` - the binding's value after the update
    /// * `Err(StashError::PersistenceWrite)` if a synchronous write failed;
    ///   the new value is still held in memory
    pub fn set(&self, name: &str, value: Value, immediate: bool) -> Result<Value> {
        let mut state = self.shared.state.lock();
        self.set_locked(&mut state, name, value, immediate)
    }

    /// Writes the current value to the backing file, replacing its contents
    ///
    /// A successful save also retires any pending debounced write.
    pub fn save(&self, name: &str) -> Result<Value> {
        let mut state = self.shared.state.lock();
        let value = self.write_locked(&state, name)?;
        cancel_pending(&mut state, name);
        Ok(value)
    }

    /// Replaces the in-memory value with the on-disk one
    ///
    /// An absent or unreadable file yields the registered default. Any
    /// pending debounced write is cancelled and nothing is written.
    ///
    /// # Returns
    /// * `Ok(Value)` - the value now held in memory
    /// * `Err(StashError::Deserialization)` if the file is corrupt; the
    ///   in-memory value and pending write are left as they were
    pub fn load(&self, name: &str) -> Result<Value> {
        self.load_with(name, |_| Ok(()))
    }

    /// `load` that installs the value only once `validate` accepts it
    ///
    /// A rejected value leaves memory and the pending write untouched.
    pub(crate) fn load_with(
        &self,
        name: &str,
        validate: impl FnOnce(&Value) -> Result<()>,
    ) -> Result<Value> {
        let mut state = self.shared.state.lock();
        let path = state.registry.resolved_file(name)?;
        let value = match codec::read_document(&path)? {
            Some(value) => value,
            None => state.registry.attributes_of(name)?.default_value.clone(),
        };
        validate(&value)?;

        cancel_pending(&mut state, name);
        state.values.insert(name.to_string(), value.clone());
        debug!(binding = %name, "Loaded from {}", path.display());
        Ok(value)
    }

    /// Restores the registered default, persisting like an ordinary `set`
    pub fn reset(&self, name: &str) -> Result<Value> {
        let mut state = self.shared.state.lock();
        let default_value = state.registry.attributes_of(name)?.default_value.clone();
        self.set_locked(&mut state, name, default_value, false)
    }

    /// Returns the binding's outstanding debounced write, if any
    pub fn pending(&self, name: &str) -> Result<Option<PendingWrite>> {
        let state = self.shared.state.lock();
        state.registry.attributes_of(name)?;
        Ok(state.pending.get(name).map(|armed| armed.info.clone()))
    }

    /// Synchronously saves every binding with a pending write
    ///
    /// Bindings whose save fails keep their timer. All bindings are attempted
    /// before the first failure is returned.
    ///
    /// # Returns
    /// * `Ok(usize)` - number of bindings written
    /// * `Err(StashError)` - the first failure encountered
    pub fn flush(&self) -> Result<usize> {
        let mut state = self.shared.state.lock();
        let mut names: Vec<String> = state.pending.keys().cloned().collect();
        names.sort();

        let mut written = 0;
        let mut first_error = None;
        for name in names {
            match self.write_locked(&state, &name) {
                Ok(_) => {
                    cancel_pending(&mut state, &name);
                    written += 1;
                }
                Err(e) => {
                    warn!(binding = %name, "Flush failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Installs a value without writing it or arming a timer
    pub(crate) fn install(
        &self,
        name: &str,
        path: PathBuf,
        default_value: Value,
        write_delay: Option<Duration>,
        value: Value,
    ) {
        let mut state = self.shared.state.lock();
        cancel_pending(&mut state, name);
        state.registry.register(name, path, default_value, write_delay);
        state.values.insert(name.to_string(), value);
    }

    fn set_locked(
        &self,
        state: &mut State,
        name: &str,
        value: Value,
        immediate: bool,
    ) -> Result<Value> {
        let write_delay = state.registry.attributes_of(name)?.write_delay;
        state.values.insert(name.to_string(), value.clone());

        match write_delay {
            Some(delay) if !immediate => self.arm(state, name, delay),
            _ => {
                self.write_locked(state, name)?;
                cancel_pending(state, name);
            }
        }
        Ok(value)
    }

    fn arm(&self, state: &mut State, name: &str, delay: Duration) {
        cancel_pending(state, name);

        state.next_generation += 1;
        let generation = state.next_generation;
        let shared = Arc::downgrade(&self.shared);
        let owned_name = name.to_string();
        let timer = self.shared.scheduler.schedule(
            delay,
            Box::new(move || fire(shared, &owned_name, generation)),
        );

        let armed_at = Utc::now();
        let fires_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| armed_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        debug!(binding = %name, ?delay, "Armed debounced write");

        state.pending.insert(
            name.to_string(),
            ArmedTimer {
                generation,
                timer,
                info: PendingWrite {
                    name: name.to_string(),
                    armed_at,
                    fires_at,
                },
            },
        );
    }

    fn write_locked(&self, state: &State, name: &str) -> Result<Value> {
        write_binding(state, name, self.shared.create_missing_dirs)
    }
}

impl Drop for Shared {
    /// Writes whatever is still pending once the last handle goes away
    fn drop(&mut self) {
        let create_missing_dirs = self.create_missing_dirs;
        let state = self.state.get_mut();
        let mut names: Vec<String> = state.pending.keys().cloned().collect();
        names.sort();

        for name in names {
            if let Err(e) = write_binding(state, &name, create_missing_dirs) {
                warn!(binding = %name, "Save on drop failed: {}", e);
            }
            cancel_pending(state, &name);
        }
    }
}

fn write_binding(state: &State, name: &str, create_missing_dirs: bool) -> Result<Value> {
    let path = state.registry.resolved_file(name)?;
    let value = state
        .values
        .get(name)
        .ok_or_else(|| StashError::UnknownBinding(name.to_string()))?;

    write_file(&path, value, create_missing_dirs).map_err(|source| {
        StashError::PersistenceWrite {
            path: path.clone(),
            source,
        }
    })?;
    debug!(binding = %name, "Saved to {}", path.display());
    Ok(value.clone())
}

/// Timer callback. Superseded timers are ignored.
///
/// A store that is already gone wrote its pending values on drop.
fn fire(shared: Weak<Shared>, name: &str, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let store = Store { shared };
    let mut state = store.shared.state.lock();

    match state.pending.get(name) {
        Some(armed) if armed.generation == generation => {}
        _ => {
            debug!(binding = %name, generation, "Ignoring superseded timer");
            return;
        }
    }
    state.pending.remove(name);

    if let Err(e) = store.write_locked(&state, name) {
        warn!(binding = %name, "Debounced save failed: {}", e);
    }
}

fn cancel_pending(state: &mut State, name: &str) {
    if let Some(armed) = state.pending.remove(name) {
        armed.timer.cancel();
    }
}

fn write_file(path: &Path, value: &Value, create_missing_dirs: bool) -> std::io::Result<()> {
    if create_missing_dirs {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, codec::encode(value)?)
}
