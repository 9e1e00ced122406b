//! Typed stash handles
//!
//! `Store::declare` wires a binding up in one step: it picks the backing file,
//! resumes whatever was saved there last time and hands back a [`Stash<T>`]
//! that reads and writes plain Rust values.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use super::codec;
use super::debounced::{PendingWrite, Store};
use crate::error::{Result, StashError};
use crate::registry::sanitize_file_name;

/// When a declared stash writes after being set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteDelay {
    /// Use the store's configured default delay
    #[default]
    StoreDefault,
    /// Write after this much idle time
    Idle(Duration),
    /// Write synchronously on every set
    Synchronous,
}

/// Options for [`Store::declare`]
#[derive(Debug, Clone, Default)]
pub struct DeclareOptions {
    /// Subdirectory of the base directory holding the file
    pub subdir: Option<PathBuf>,
    /// Explicit file name; defaults to the sanitized binding name plus `.json`
    pub file: Option<String>,
    pub write_delay: WriteDelay,
}

impl DeclareOptions {
    pub fn subdir(mut self, subdir: impl Into<PathBuf>) -> Self {
        self.subdir = Some(subdir.into());
        self
    }

    pub fn file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.write_delay = WriteDelay::Idle(delay);
        self
    }

    pub fn synchronous(mut self) -> Self {
        self.write_delay = WriteDelay::Synchronous;
        self
    }
}

impl Store {
    /// Declares a persistent binding and returns a typed handle to it
    ///
    /// The file path is resolved against the base directory now and stored
    /// as an absolute path. If the file already holds a value it becomes the
    /// initial value; otherwise `default` does. Declaring never writes.
    ///
    /// # Arguments
    /// * `name` - Binding name, also the file stem unless `options.file` is set
    /// * `default` - Value used when nothing is on disk, and by `reset`
    /// * `options` - Subdirectory, file name and write delay
    ///
    /// # Returns
    /// * `Ok(Stash<T>)` on success
    /// * `Err(StashError::Deserialization)` if the existing file is corrupt
    /// * `Err(StashError::Conversion)` if the saved value is not a `T`
    ///
    /// Nothing is registered when an error is returned.
    pub fn declare<T>(&self, name: &str, default: T, options: DeclareOptions) -> Result<Stash<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let default_value = to_value(name, &default)?;
        let file_name = options
            .file
            .unwrap_or_else(|| format!("{}.json", sanitize_file_name(name)));

        let mut path = self.base_dir();
        if let Some(subdir) = options.subdir {
            path.push(subdir);
        }
        path.push(file_name);

        let initial = match codec::read_document(&path)? {
            Some(saved) => {
                from_value::<T>(name, saved.clone())?;
                saved
            }
            None => default_value.clone(),
        };

        let write_delay = match options.write_delay {
            WriteDelay::StoreDefault => Some(self.default_delay()),
            WriteDelay::Idle(delay) => Some(delay),
            WriteDelay::Synchronous => None,
        };
        self.install(name, path, default_value, write_delay, initial);

        Ok(Stash {
            store: self.clone(),
            name: name.to_string(),
            _marker: PhantomData,
        })
    }
}

/// Typed view of one declared binding
pub struct Stash<T> {
    store: Store,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Stash<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Stash<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved backing file
    pub fn path(&self) -> Result<PathBuf> {
        self.store.resolved_file(&self.name)
    }

    pub fn get(&self) -> Result<T> {
        from_value(&self.name, self.store.get(&self.name)?)
    }

    /// Sets the value; the write happens after the binding's idle delay
    pub fn set(&self, value: T) -> Result<T> {
        let value = to_value(&self.name, &value)?;
        from_value(&self.name, self.store.set(&self.name, value, false)?)
    }

    /// Sets the value and writes it before returning
    pub fn set_now(&self, value: T) -> Result<T> {
        let value = to_value(&self.name, &value)?;
        from_value(&self.name, self.store.set(&self.name, value, true)?)
    }

    /// Reads, transforms and sets the value in one call
    pub fn update(&self, f: impl FnOnce(T) -> T) -> Result<T> {
        let current = self.get()?;
        self.set(f(current))
    }

    pub fn save(&self) -> Result<T> {
        from_value(&self.name, self.store.save(&self.name)?)
    }

    /// Reloads from disk; a saved value that is not a `T` is rejected
    /// before it can replace the current one
    pub fn load(&self) -> Result<T> {
        let value = self.store.load_with(&self.name, |value| {
            from_value::<T>(&self.name, value.clone()).map(drop)
        })?;
        from_value(&self.name, value)
    }

    pub fn reset(&self) -> Result<T> {
        from_value(&self.name, self.store.reset(&self.name)?)
    }

    pub fn pending(&self) -> Result<Option<PendingWrite>> {
        self.store.pending(&self.name)
    }
}

fn to_value<T: Serialize>(name: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|source| StashError::Conversion {
        name: name.to_string(),
        source,
    })
}

fn from_value<T: DeserializeOwned>(name: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| StashError::Conversion {
        name: name.to_string(),
        source,
    })
}
