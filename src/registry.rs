//! Binding registry
//!
//! Maps a binding name to its out-of-band metadata: the backing file, the
//! default value and the write delay. The registry never touches current
//! values or the filesystem.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StashError};

/// Metadata stored for one binding
#[derive(Debug, Clone, PartialEq)]
pub struct BindingAttrs {
    /// Backing file, relative to the base directory or absolute
    pub file: PathBuf,
    /// Value restored by `reset` and used when the file is absent
    pub default_value: Value,
    /// Idle delay before a write; `None` writes on every set
    pub write_delay: Option<Duration>,
}

/// Side table of registered bindings
#[derive(Debug, Clone)]
pub struct Registry {
    base_dir: PathBuf,
    bindings: HashMap<String, BindingAttrs>,
}

impl Registry {
    /// Creates an empty registry resolving against `base_dir`
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            bindings: HashMap::new(),
        }
    }

    /// Stores the attributes for `name`, overwriting any earlier registration
    ///
    /// # Returns
    /// The registered name
    pub fn register(
        &mut self,
        name: &str,
        file: impl Into<PathBuf>,
        default_value: Value,
        write_delay: Option<Duration>,
    ) -> String {
        self.bindings.insert(
            name.to_string(),
            BindingAttrs {
                file: file.into(),
                default_value,
                write_delay,
            },
        );
        name.to_string()
    }

    /// Returns the attributes registered for `name`
    ///
    /// # Returns
    /// * `Ok(&BindingAttrs)` if the binding exists
    /// * `Err(StashError::UnknownBinding)` otherwise
    pub fn attributes_of(&self, name: &str) -> Result<&BindingAttrs> {
        self.bindings
            .get(name)
            .ok_or_else(|| StashError::UnknownBinding(name.to_string()))
    }

    /// Joins the binding's file with the base directory
    ///
    /// Absolute files are returned unchanged, so moving the base directory
    /// later does not relocate them.
    pub fn resolved_file(&self, name: &str) -> Result<PathBuf> {
        let attrs = self.attributes_of(name)?;
        Ok(self.base_dir.join(&attrs.file))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn set_base_dir(&mut self, base_dir: PathBuf) {
        self.base_dir = base_dir;
    }
}

/// Turns a binding name into a filesystem-safe file stem
///
/// ASCII alphanumerics, `-` and `_` are kept; everything else becomes `_`.
/// A leading `.` is replaced as well so the result is never hidden and never
/// a relative path component.
pub fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .enumerate()
        .map(|(i, c)| match c {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => c,
            '.' if i > 0 => '.',
            _ => '_',
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_registry() -> Registry {
        Registry::new(PathBuf::from("/data/stash"))
    }

    #[test]
    fn test_register_returns_name() {
        let mut registry = create_test_registry();
        let name = registry.register("counter", "counter.json", json!(0), None);
        assert_eq!(name, "counter");
        assert!(registry.contains("counter"));
    }

    #[test]
    fn test_attributes_of_unknown_binding_fails() {
        let registry = create_test_registry();
        let result = registry.attributes_of("missing");
        assert!(matches!(result, Err(StashError::UnknownBinding(name)) if name == "missing"));
    }

    #[test]
    fn test_reregistration_overwrites_attributes() {
        let mut registry = create_test_registry();
        registry.register("history", "a.json", json!([]), None);
        registry.register("history", "b.json", json!(["x"]), Some(Duration::from_secs(2)));

        let attrs = registry.attributes_of("history").expect("Binding should exist");
        assert_eq!(attrs.file, PathBuf::from("b.json"));
        assert_eq!(attrs.default_value, json!(["x"]));
        assert_eq!(attrs.write_delay, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_resolved_file_joins_base_dir() {
        let mut registry = create_test_registry();
        registry.register("counter", "nested/counter.json", json!(0), None);

        let path = registry.resolved_file("counter").expect("Should resolve");
        assert_eq!(path, PathBuf::from("/data/stash/nested/counter.json"));
    }

    #[test]
    fn test_resolved_file_keeps_absolute_path_after_base_change() {
        let mut registry = create_test_registry();
        registry.register("abs", "/var/lib/abs.json", json!(null), None);
        registry.register("rel", "rel.json", json!(null), None);

        registry.set_base_dir(PathBuf::from("/elsewhere"));

        assert_eq!(
            registry.resolved_file("abs").unwrap(),
            PathBuf::from("/var/lib/abs.json")
        );
        assert_eq!(
            registry.resolved_file("rel").unwrap(),
            PathBuf::from("/elsewhere/rel.json")
        );
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry = create_test_registry();
        registry.register("zeta", "z", json!(0), None);
        registry.register("alpha", "a", json!(0), None);
        assert_eq!(registry.names(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("recent-files"), "recent-files");
        assert_eq!(sanitize_file_name("my/var name"), "my_var_name");
        assert_eq!(sanitize_file_name("../etc"), "_._etc");
        assert_eq!(sanitize_file_name("v1.2"), "v1.2");
        assert_eq!(sanitize_file_name("*scratch*"), "_scratch_");
        assert_eq!(sanitize_file_name(""), "_");
    }
}
