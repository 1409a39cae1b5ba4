use crate::alerts::ErrorAlert;
use crate::error::RegistryError;
use log::debug;
use std::sync::{Arc, RwLock};

/// Capability shared by every delivery strategy
///
/// `receive` is called on the dispatch path, which may be the logging call
/// site itself, so implementations must never block or perform I/O inline.
pub trait Observer: Send + Sync {
    /// Accept one alert
    fn receive(&self, alert: &ErrorAlert);

    /// Release runtime resources (scheduled jobs) held by this observer
    fn stop(&self) {}
}

/// Keyed set of active observers
///
/// Observers are kept in registration order. `dispatch` works on a snapshot
/// taken under a short read lock, so an observer removed concurrently may
/// still see the alert currently being dispatched.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<(String, Arc<dyn Observer>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer under a key
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateKey` if the key is already registered.
    pub fn add(&self, key: &str, observer: Arc<dyn Observer>) -> Result<(), RegistryError> {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        if observers.iter().any(|(k, _)| k == key) {
            return Err(RegistryError::DuplicateKey(key.to_string()));
        }
        observers.push((key.to_string(), observer));
        debug!("Registered observer {} ({} active)", key, observers.len());
        Ok(())
    }

    /// Remove and return the observer registered under a key
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if nothing is registered under the key.
    pub fn remove(&self, key: &str) -> Result<Arc<dyn Observer>, RegistryError> {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        let index = observers
            .iter()
            .position(|(k, _)| k == key)
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
        let (_, observer) = observers.remove(index);
        debug!("Removed observer {} ({} active)", key, observers.len());
        Ok(observer)
    }

    /// Hand an alert to every registered observer, in registration order
    pub fn dispatch(&self, alert: &ErrorAlert) {
        for observer in self.snapshot() {
            observer.receive(alert);
        }
    }

    /// Stop and drop every registered observer
    pub fn shutdown(&self) {
        let drained: Vec<(String, Arc<dyn Observer>)> = {
            let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
            observers.drain(..).collect()
        };
        for (key, observer) in drained {
            debug!("Stopping observer {}", key);
            observer.stop();
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|(k, _)| k == key)
    }

    /// Registered keys, in registration order
    pub fn keys(&self) -> Vec<String> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}
