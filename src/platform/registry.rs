//! Name to platform mapping.

use std::collections::BTreeMap;
use std::fmt;

use super::Platform;

/// Builds a platform on demand; `None` marks an entry that cannot currently
/// produce a usable platform.
pub type PlatformFactory<'t> = Box<dyn Fn() -> Option<Box<dyn Platform + 't>> + 't>;

/// Compile-time registered platforms, keyed by name.
#[derive(Default)]
pub struct PlatformRegistry<'t> {
    factories: BTreeMap<String, PlatformFactory<'t>>,
}

impl<'t> PlatformRegistry<'t> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Option<Box<dyn Platform + 't>> + 't,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Builder form of [`PlatformRegistry::register`].
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Option<Box<dyn Platform + 't>> + 't,
    {
        self.register(name, factory);
        self
    }

    /// Builds the platform registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Box<dyn Platform + 't>> {
        self.factories.get(name).and_then(|factory| factory())
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for PlatformRegistry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.names())
            .finish()
    }
}
