use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::future::Future;
use std::path::Path;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

use super::{is_preference, PrefKey, PreferenceBackend, UserPrefs};
use crate::constants::lock::SQLITE_BUSY_TIMEOUT;
use crate::constants::preferences::{FIELDS, KEY_FIELD, NAME_FIELD};
use crate::error::{StateError, StoreError};
use crate::shared::StorageKind;

/// Preference backend over an sqlite database.
///
/// Concurrent bot instances share the database file directly and rely on
/// sqlite transactions and its busy timeout instead of the lock files used
/// by the other datasets. The driver is async, so the store owns a
/// current-thread runtime and blocks on every query: it must be opened and
/// used from synchronous code, such as a `spawn_blocking` task.
#[derive(Debug)]
pub struct SqlitePreferences {
    runtime: Option<Runtime>,
    pool: SqlitePool,
}

impl SqlitePreferences {
    /// Opens (or creates) the database and brings its schema up to date.
    /// Fails with [`StoreError::InsideRuntime`] when called from an async
    /// context.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if Handle::try_current().is_ok() {
            return Err(StoreError::InsideRuntime);
        }
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(SQLITE_BUSY_TIMEOUT);
        let pool = runtime.block_on(SqlitePoolOptions::new().max_connections(1).connect_with(options))?;

        let store = Self {
            runtime: Some(runtime),
            pool,
        };
        store.migrate()?;
        debug!(kind = ?StorageKind::Sqlite, path = %path.display(), "Opened sqlite preferences");
        Ok(store)
    }

    /// Creates the table and adds the columns of preference fields missing
    /// from it. Safe to run on every start.
    fn migrate(&self) -> Result<(), StoreError> {
        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS preferences (
                    \"{KEY_FIELD}\" text NOT NULL,
                    \"{NAME_FIELD}\" text NOT NULL DEFAULT '',
                    PRIMARY KEY(\"{KEY_FIELD}\")
                )"
            ))
            .execute(&mut *tx)
            .await?;

            let columns: Vec<String> = sqlx::query("PRAGMA table_info(preferences)")
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>("name"))
                .collect::<Result<_, _>>()?;

            for (field, _) in FIELDS {
                if columns.iter().any(|c| c == field) {
                    continue;
                }
                sqlx::query(&format!(
                    "ALTER TABLE preferences ADD COLUMN \"{field}\" text NOT NULL DEFAULT ''"
                ))
                .execute(&mut *tx)
                .await?;
                info!(column = %field, "Added preference column");
            }

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        })?
        .map_err(|e| StoreError::Schema(e.to_string()))
    }

    fn fetch(&self, key: &PrefKey) -> Result<Option<SqliteRow>, StoreError> {
        let row = self.block_on(
            sqlx::query(&format!("SELECT * FROM preferences WHERE \"{KEY_FIELD}\" = ?"))
                .bind(key.encode())
                .fetch_optional(&self.pool),
        )??;
        Ok(row)
    }

    /// Runs `future` to completion on the store's runtime.
    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, StoreError> {
        match &self.runtime {
            Some(runtime) if Handle::try_current().is_err() => Ok(runtime.block_on(future)),
            _ => Err(StoreError::InsideRuntime),
        }
    }
}

fn row_prefs(row: &SqliteRow) -> UserPrefs {
    FIELDS
        .iter()
        .filter_map(|(field, _)| {
            let value: String = row.try_get(*field).ok()?;
            (!value.is_empty()).then(|| (field.to_string(), value))
        })
        .collect()
}

impl PreferenceBackend for SqlitePreferences {
    fn user_prefs(&mut self, key: &PrefKey) -> Result<UserPrefs, StateError> {
        Ok(self.fetch(key)?.as_ref().map(row_prefs).unwrap_or_default())
    }

    fn set_pref(&mut self, key: &PrefKey, name: &str, pref: &str, value: &str) -> Result<(), StateError> {
        // column names cannot be bound, only declared fields reach the query
        if !is_preference(pref) {
            return Err(StateError::UnknownPreference(pref.to_string()));
        }
        let sql = format!(
            "INSERT INTO preferences (\"{KEY_FIELD}\", \"{NAME_FIELD}\", \"{pref}\") VALUES (?, ?, ?)
             ON CONFLICT(\"{KEY_FIELD}\") DO UPDATE SET \"{NAME_FIELD}\" = excluded.\"{NAME_FIELD}\", \"{pref}\" = excluded.\"{pref}\""
        );
        self.block_on(
            sqlx::query(&sql)
                .bind(key.encode())
                .bind(name)
                .bind(value)
                .execute(&self.pool),
        )?
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn migrate_key(&mut self, from: &PrefKey, to: &PrefKey) -> Result<bool, StateError> {
        if from == to {
            return Ok(false);
        }
        let moved = self.block_on(async {
            let mut tx = self.pool.begin().await?;
            let select = format!("SELECT * FROM preferences WHERE \"{KEY_FIELD}\" = ?");

            let Some(old) = sqlx::query(&select).bind(from.encode()).fetch_optional(&mut *tx).await? else {
                return Ok::<bool, sqlx::Error>(false);
            };
            let existing = sqlx::query(&select).bind(to.encode()).fetch_optional(&mut *tx).await?;

            match existing {
                None => {
                    sqlx::query(&format!("UPDATE preferences SET \"{KEY_FIELD}\" = ? WHERE \"{KEY_FIELD}\" = ?"))
                        .bind(to.encode())
                        .bind(from.encode())
                        .execute(&mut *tx)
                        .await?;
                }
                Some(current) => {
                    let current = row_prefs(&current);
                    for (field, value) in row_prefs(&old) {
                        if current.contains_key(&field) {
                            continue;
                        }
                        sqlx::query(&format!("UPDATE preferences SET \"{field}\" = ? WHERE \"{KEY_FIELD}\" = ?"))
                            .bind(value)
                            .bind(to.encode())
                            .execute(&mut *tx)
                            .await?;
                    }
                    sqlx::query(&format!("DELETE FROM preferences WHERE \"{KEY_FIELD}\" = ?"))
                        .bind(from.encode())
                        .execute(&mut *tx)
                        .await?;
                }
            }

            tx.commit().await?;
            Ok(true)
        })?;
        Ok(moved.map_err(StoreError::from)?)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

impl Drop for SqlitePreferences {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            warn!("Sqlite preferences dropped inside an async runtime, connections closed without waiting");
            runtime.shutdown_background();
            return;
        }
        runtime.block_on(self.pool.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.sqlite");
        let bob = PrefKey::Account(42);
        {
            let mut store = SqlitePreferences::open(&path).unwrap();
            store.set_pref(&bob, "Bob", "voteMode", "away").unwrap();
            store.set_pref(&bob, "Bob", "ircColors", "1").unwrap();
            store.set_pref(&bob, "Bob", "ircColors", "").unwrap();
            assert_eq!(store.get_pref(&bob, "voteMode").unwrap().as_deref(), Some("away"));
            assert_eq!(store.get_pref(&bob, "ircColors").unwrap(), None);
        }

        let mut reopened = SqlitePreferences::open(&path).unwrap();
        assert_eq!(reopened.user_prefs(&bob).unwrap().len(), 1);
        assert!(reopened.user_prefs(&PrefKey::Account(7)).unwrap().is_empty());
    }

    #[test]
    fn test_missing_columns_added() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.sqlite");
        {
            let store = SqlitePreferences::open(&path).unwrap();
            store
                .block_on(sqlx::query("ALTER TABLE preferences DROP COLUMN \"clan\"").execute(&store.pool))
                .unwrap()
                .unwrap();
        }
        let mut store = SqlitePreferences::open(&path).unwrap();
        store.set_pref(&PrefKey::Account(1), "A", "clan", "ABC").unwrap();
        assert_eq!(store.get_pref(&PrefKey::Account(1), "clan").unwrap().as_deref(), Some("ABC"));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqlitePreferences::open(&dir.path().join("p.sqlite")).unwrap();
        let err = store
            .set_pref(&PrefKey::Account(1), "A", "x\" = 1; --", "v")
            .unwrap_err();
        assert!(matches!(err, StateError::UnknownPreference(_)));
    }

    #[test]
    fn test_migrate_key_merges() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SqlitePreferences::open(&dir.path().join("p.sqlite")).unwrap();
        let unknown = PrefKey::Unknown("Bob".into());
        let known = PrefKey::Account(42);

        store.set_pref(&unknown, "Bob", "voteMode", "away").unwrap();
        assert!(store.migrate_key(&unknown, &known).unwrap());
        assert_eq!(store.get_pref(&known, "voteMode").unwrap().as_deref(), Some("away"));

        store.set_pref(&unknown, "Bob", "voteMode", "normal").unwrap();
        store.set_pref(&unknown, "Bob", "clan", "ABC").unwrap();
        assert!(store.migrate_key(&unknown, &known).unwrap());
        let prefs = store.user_prefs(&known).unwrap();
        assert_eq!(prefs["voteMode"], "away");
        assert_eq!(prefs["clan"], "ABC");
        assert!(store.user_prefs(&unknown).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_refused_inside_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqlitePreferences::open(&dir.path().join("p.sqlite")).unwrap_err();
        assert!(matches!(err, StoreError::InsideRuntime));
    }

    #[test]
    fn test_drop_inside_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlitePreferences::open(&dir.path().join("p.sqlite")).unwrap();
        let runtime = Builder::new_current_thread().build().unwrap();
        runtime.block_on(async move { drop(store) });
    }
}
