//! Credential store: lookup and insertion of registered users.

use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Register a new user.
    ///
    /// Returns [`StoreError::DuplicateUsername`] when the name is taken.
    pub fn insert_user(&self, username: &str, password_hash: &str) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO users (username, password_hash, created_at)
             VALUES (?1, ?2, ?3)",
            params![username, password_hash, Utc::now().to_rfc3339()],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateUsername(username.to_string()))
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Fetch the stored password digest of a user.
    pub fn lookup_password_hash(&self, username: &str) -> Result<String> {
        self.conn()
            .query_row(
                "SELECT password_hash FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn user_exists(&self, username: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_user(&self, username: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT username, password_hash, created_at
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn count_users(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let ts_str: String = row.get(2)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        username: row.get(0)?,
        password_hash: row.get(1)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user("alice", "salt$digest").unwrap();

        assert_eq!(db.lookup_password_hash("alice").unwrap(), "salt$digest");
        assert!(db.user_exists("alice").unwrap());
        assert_eq!(db.get_user("alice").unwrap().username, "alice");
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn duplicate_username_is_reported() {
        let db = Database::open_in_memory().unwrap();
        db.insert_user("alice", "a$b").unwrap();

        let err = db.insert_user("alice", "c$d").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername(ref name) if name == "alice"));
        assert!(err.is_user_facing());
        // The original record is untouched.
        assert_eq!(db.lookup_password_hash("alice").unwrap(), "a$b");
    }

    #[test]
    fn unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.lookup_password_hash("carol"),
            Err(StoreError::NotFound)
        ));
        assert!(!db.user_exists("carol").unwrap());
    }
}
