//! Per-database engine cache.
//!
//! One [`Engine`] handle is kept per database name, plus one for the
//! server-level connection used when no database is named. Old handles are
//! disposed before a replacement is stored.

use std::{collections::HashMap, fmt, sync::Arc};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::driver::Engine;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineKey {
    /// Server-level handle with no database in its URL.
    Server,
    Database(String),
}

impl EngineKey {
    pub fn for_database(database: Option<&str>) -> Self {
        match database {
            Some(name) if !name.is_empty() => EngineKey::Database(name.to_string()),
            _ => EngineKey::Server,
        }
    }

    /// Database segment used when building the engine URL.
    pub fn database_name(&self) -> &str {
        match self {
            EngineKey::Server => "",
            EngineKey::Database(name) => name,
        }
    }
}

impl fmt::Display for EngineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKey::Server => f.write_str("<server>"),
            EngineKey::Database(name) => f.write_str(name),
        }
    }
}

#[derive(Default)]
pub struct EngineCache {
    engines: Mutex<HashMap<EngineKey, Arc<dyn Engine>>>,
}

impl EngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.lock().is_empty()
    }

    pub fn contains(&self, key: &EngineKey) -> bool {
        self.engines.lock().contains_key(key)
    }

    pub fn get(&self, key: &EngineKey) -> Option<Arc<dyn Engine>> {
        self.engines.lock().get(key).cloned()
    }

    /// Drops and disposes the handle for `key`. Returns whether one existed.
    pub fn invalidate(&self, key: &EngineKey) -> bool {
        let removed = self.engines.lock().remove(key);
        match removed {
            Some(engine) => {
                dispose_quietly(key, engine.as_ref());
                true
            }
            None => false,
        }
    }

    /// Returns the cached handle for `key`, building one only when absent.
    pub fn get_or_create<E, F>(&self, key: EngineKey, create: F) -> Result<Arc<dyn Engine>, E>
    where
        F: FnOnce() -> Result<Arc<dyn Engine>, E>,
    {
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&key) {
            return Ok(engine.clone());
        }
        let engine = create()?;
        debug!("Created engine for {key}");
        engines.insert(key, engine.clone());
        Ok(engine)
    }

    /// Disposes any cached handle for `key`, then builds and stores a new
    /// one. If building fails the key is left empty.
    pub fn replace<E, F>(&self, key: EngineKey, create: F) -> Result<Arc<dyn Engine>, E>
    where
        F: FnOnce() -> Result<Arc<dyn Engine>, E>,
    {
        let mut engines = self.engines.lock();
        if let Some(old) = engines.remove(&key) {
            dispose_quietly(&key, old.as_ref());
        }
        let engine = create()?;
        debug!("Created engine for {key}");
        engines.insert(key, engine.clone());
        Ok(engine)
    }

    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.engines.lock().drain().collect();
        for (key, engine) in drained {
            dispose_quietly(&key, engine.as_ref());
        }
    }
}

impl fmt::Debug for EngineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engines = self.engines.lock();
        f.debug_struct("EngineCache")
            .field("keys", &engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn dispose_quietly(key: &EngineKey, engine: &dyn Engine) {
    match engine.dispose() {
        Ok(()) => debug!("Disposed engine for {key}"),
        Err(err) => warn!("Failed to dispose engine for {key}: {err}"),
    }
}
