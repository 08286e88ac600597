//! Store provider
//!
//! Owns the `sled::Db` and the registry of live stores. There is at most one
//! live [`MessageStore`] per name: opening a name that is already open hands
//! back the same `Arc`. A store that has been closed is replaced by a fresh
//! instance on the next open.
//!
//! The provider is an ordinary value created at process start and passed to
//! whoever needs it; there is no global instance.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sled::Db;
use tracing::{info, warn};

use super::engine::MessageStore;
use crate::config::StoreSettings;
use crate::persistence::Table;
use crate::utils::{Result, StoreError};

const MAX_NAME_LEN: usize = 128;

pub struct StoreProvider {
    db: Db,
    sync_writes: bool,
    stores: Mutex<HashMap<String, Arc<MessageStore>>>,
}

impl StoreProvider {
    /// Open or create the database under `settings.data_dir`.
    pub fn open(settings: &StoreSettings) -> Result<Self> {
        Self::open_path(&settings.data_dir, settings.sync_writes)
    }

    pub fn open_path(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), "store provider opened");
        Ok(Self::with_db(db, sync_writes))
    }

    pub fn with_db(db: Db, sync_writes: bool) -> Self {
        Self {
            db,
            sync_writes,
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<MessageStore>>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live store called `name`, opening it (and creating its
    /// trees) if needed.
    ///
    /// `capacity` only applies when a new instance is created; a live
    /// instance keeps the capacity it was opened with.
    pub fn open_message_store(&self, name: &str, capacity: usize) -> Result<Arc<MessageStore>> {
        validate_name(name)?;
        if capacity == 0 {
            return Err(StoreError::InvalidCapacity);
        }

        let mut stores = self.registry();
        if let Some(store) = stores.get(name) {
            if !store.is_closed() {
                if store.capacity() != capacity {
                    warn!(
                        store = name,
                        live = store.capacity(),
                        requested = capacity,
                        "store already open with a different capacity"
                    );
                }
                return Ok(Arc::clone(store));
            }
        }

        let table = Table::open(&self.db, name, self.sync_writes)?;
        let store = Arc::new(MessageStore::new(name, capacity, table)?);
        stores.insert(name.to_string(), Arc::clone(&store));
        info!(store = name, capacity, "message store opened");
        Ok(store)
    }

    /// Close the live instance of `name`, if any, and delete its data.
    pub fn delete_message_store(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let mut stores = self.registry();
        if let Some(store) = stores.remove(name) {
            store.close()?;
        }
        let existed = Table::destroy(&self.db, name)?;
        if existed {
            info!(store = name, "message store deleted");
        }
        Ok(existed)
    }

    /// Names of all stores with persisted data, open or not.
    pub fn store_names(&self) -> Vec<String> {
        Table::names(&self.db)
    }

    /// Close every live store.
    pub fn close_all(&self) -> Result<()> {
        let stores: Vec<_> = self.registry().drain().map(|(_, store)| store).collect();
        for store in stores {
            store.close()?;
        }
        self.db.flush()?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

impl std::fmt::Debug for StoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreProvider")
            .field("db", &"sled::Db")
            .field("stores", &self.registry().keys().collect::<Vec<_>>())
            .finish()
    }
}
