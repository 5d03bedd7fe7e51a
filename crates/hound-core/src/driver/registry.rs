//! Driver registry: the process-wide name-to-factory table.
//!
//! Registration is a one-shot: a second registration under the same name
//! fails. Hosts register all drivers during library setup, before the first
//! `init_driver` call.

use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::DriverFactory;

/// Name → factory table backing driver instantiation.
pub(crate) struct DriverRegistry {
    factories: Mutex<FxHashMap<String, Arc<dyn DriverFactory>>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub(crate) fn new() -> Self {
        Self {
            factories: Mutex::new(FxHashMap::default()),
        }
    }

    /// Registers a factory under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidString`] for an empty name and
    /// [`Error::DriverAlreadyRegistered`] if the name is taken.
    pub(crate) fn register(&self, name: &str, factory: Arc<dyn DriverFactory>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidString);
        }
        let mut factories = self.factories.lock();
        if factories.contains_key(name) {
            return Err(Error::DriverAlreadyRegistered);
        }
        factories.insert(name.to_owned(), factory);
        Ok(())
    }

    /// Looks up the factory registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DriverNotRegistered`] for unknown names.
    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<dyn DriverFactory>> {
        self.factories
            .lock()
            .get(name)
            .cloned()
            .ok_or(Error::DriverNotRegistered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use crate::driver::Driver;
    use crate::types::InitArg;

    fn dummy_factory() -> Arc<dyn DriverFactory> {
        Arc::new(|_path: &Path, _args: &[InitArg]| -> Result<Box<dyn Driver>> {
            Err(Error::DriverFail)
        })
    }

    #[test]
    fn test_registry_one_shot() {
        let registry = DriverRegistry::new();
        registry.register("counter", dummy_factory()).unwrap();
        assert_eq!(
            registry.register("counter", dummy_factory()),
            Err(Error::DriverAlreadyRegistered)
        );
        // A different name is still free.
        registry.register("gps", dummy_factory()).unwrap();
    }

    #[test]
    fn test_registry_lookup() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.lookup("nope"),
            Err(Error::DriverNotRegistered)
        ));
        registry.register("nop", dummy_factory()).unwrap();
        assert!(registry.lookup("nop").is_ok());
    }

    #[test]
    fn test_registry_empty_name_rejected() {
        let registry = DriverRegistry::new();
        assert_eq!(
            registry.register("", dummy_factory()),
            Err(Error::InvalidString)
        );
    }
}
