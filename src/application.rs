//! Hosted applications and their registry
//!
//! The dispatcher only consumes applications: it keys worker pools by name
//! and gates dispatch on the connected flag. Deployment, configuration and
//! teardown belong to the surrounding container.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// A hosted application, identified by a unique name.
pub struct Application {
    name: String,
    connected: AtomicBool,
}

impl Application {
    /// Create an application in the not-yet-connected state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Name-keyed registry of applications known to this server.
#[derive(Default)]
pub struct ApplicationRegistry {
    apps: RwLock<HashMap<String, Arc<Application>>>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application, returning its handle. Re-registering a name
    /// returns the existing handle.
    pub fn register(&self, name: &str) -> Arc<Application> {
        let mut apps = self.apps.write().expect("registry lock poisoned");
        apps.entry(name.to_string())
            .or_insert_with(|| Arc::new(Application::new(name)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Application>> {
        let apps = self.apps.read().expect("registry lock poisoned");
        apps.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let apps = self.apps.read().expect("registry lock poisoned");
        let mut names: Vec<String> = apps.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_starts_disconnected() {
        let registry = ApplicationRegistry::new();
        let app = registry.register("shop");
        assert_eq!(app.name(), "shop");
        assert!(!app.is_connected());

        app.set_connected(true);
        assert!(registry.get("shop").unwrap().is_connected());
    }

    #[test]
    fn reregistering_returns_same_handle() {
        let registry = ApplicationRegistry::new();
        let a = registry.register("shop");
        a.set_connected(true);
        let b = registry.register("shop");
        assert!(b.is_connected());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
