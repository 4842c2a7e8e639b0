//! Shared handle to the SQLite database.
//!
//! Every store call is a single short statement or transaction, so the
//! connection sits behind a plain `std::sync::Mutex` and is never held
//! across an `.await`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use netchat_store::{Database, StoreError};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Storage {
    db: Arc<Mutex<Database>>,
}

impl Storage {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Open (or create) the database file and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, ServerError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, StoreError>,
    ) -> Result<T, ServerError> {
        let mut guard = self
            .db
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock poisoned: {e}")))?;
        Ok(f(&mut guard)?)
    }
}
