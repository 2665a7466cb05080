//! Persistent record store.
//!
//! The [`Store`] trait is the seam between the control plane and whatever
//! holds its records; [`RedbStore`] is the embedded implementation.
//!
//! # Table design
//!
//! Two tables, `apps` keyed by app name and `users` keyed by email, with
//! JSON-encoded record values. Unique-key semantics fall out of the key
//! choice: inserting an existing key is a distinct `AlreadyExists` failure.
//! redb write transactions are serialized, which is what makes
//! [`Store::swap_usage`] a real compare-and-swap: the read of the current
//! usage and the conditional write happen inside one transaction.

use std::collections::BTreeMap;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::app::{App, EnvVar, Unit};
use crate::error::{DrydockError, Result};
use crate::quota::Quota;
use crate::user::User;

const APPS: TableDefinition<&str, &[u8]> = TableDefinition::new("apps");
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Which record a quota operation is aimed at.
#[derive(Debug, Clone, Copy)]
pub enum Owner<'a> {
    /// An app, by name (unit quota).
    App(&'a str),
    /// A user, by email (app-count quota).
    User(&'a str),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

pub trait Store: Send + Sync {
    /// Insert a new app. Fails with `AppExists` when the name is taken.
    fn insert_app(&self, app: &App) -> Result<()>;
    fn app(&self, name: &str) -> Result<App>;
    fn remove_app(&self, name: &str) -> Result<()>;
    fn save_units(&self, name: &str, units: &[Unit]) -> Result<()>;
    fn save_env(&self, name: &str, env: &BTreeMap<String, EnvVar>) -> Result<()>;
    fn incr_deploys(&self, name: &str) -> Result<()>;

    fn insert_user(&self, user: &User) -> Result<()>;
    fn user(&self, email: &str) -> Result<User>;
    fn remove_user(&self, email: &str) -> Result<()>;

    fn quota_of(&self, owner: Owner<'_>) -> Result<Quota>;
    /// Conditional update: set the owner's quota usage to `new` only if it
    /// still equals `expected`. Returns `false` when a concurrent writer
    /// got there first; the caller re-reads and retries.
    fn swap_usage(&self, owner: Owner<'_>, expected: u32, new: u32) -> Result<bool>;
    /// Unconditional usage increment, for owners with no ceiling to check.
    fn add_usage(&self, owner: Owner<'_>, amount: u32) -> Result<()>;
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> DrydockError {
    DrydockError::Store(e.to_string())
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the store at `path`, ensuring both tables exist.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(APPS).map_err(db_err)?;
        wt.open_table(USERS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Read-modify-write an app record inside one write transaction.
    fn update_app(&self, name: &str, f: impl FnOnce(&mut App)) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(APPS).map_err(db_err)?;
            let mut app: App = {
                let guard = table.get(name).map_err(db_err)?;
                let Some(value) = guard else {
                    return Err(DrydockError::AppNotFound(name.to_string()));
                };
                serde_json::from_slice(value.value())?
            };
            f(&mut app);
            let encoded = serde_json::to_vec(&app)?;
            table.insert(name, encoded.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn update_user(&self, email: &str, f: impl FnOnce(&mut User)) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(USERS).map_err(db_err)?;
            let mut user: User = {
                let guard = table.get(email).map_err(db_err)?;
                let Some(value) = guard else {
                    return Err(DrydockError::UserNotFound(email.to_string()));
                };
                serde_json::from_slice(value.value())?
            };
            f(&mut user);
            let encoded = serde_json::to_vec(&user)?;
            table.insert(email, encoded.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn swap_app_usage(&self, name: &str, expected: u32, new: u32) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let swapped = {
            let mut table = wt.open_table(APPS).map_err(db_err)?;
            let mut app: App = {
                let guard = table.get(name).map_err(db_err)?;
                let Some(value) = guard else {
                    return Err(DrydockError::AppNotFound(name.to_string()));
                };
                serde_json::from_slice(value.value())?
            };
            if app.quota.in_use != expected {
                false
            } else {
                app.quota.in_use = new;
                let encoded = serde_json::to_vec(&app)?;
                table.insert(name, encoded.as_slice()).map_err(db_err)?;
                true
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(swapped)
    }

    fn swap_user_usage(&self, email: &str, expected: u32, new: u32) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let swapped = {
            let mut table = wt.open_table(USERS).map_err(db_err)?;
            let mut user: User = {
                let guard = table.get(email).map_err(db_err)?;
                let Some(value) = guard else {
                    return Err(DrydockError::UserNotFound(email.to_string()));
                };
                serde_json::from_slice(value.value())?
            };
            if user.quota.in_use != expected {
                false
            } else {
                user.quota.in_use = new;
                let encoded = serde_json::to_vec(&user)?;
                table.insert(email, encoded.as_slice()).map_err(db_err)?;
                true
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(swapped)
    }
}

impl Store for RedbStore {
    fn insert_app(&self, app: &App) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(APPS).map_err(db_err)?;
            let taken = table.get(app.name.as_str()).map_err(db_err)?.is_some();
            if taken {
                return Err(DrydockError::AppExists(app.name.clone()));
            }
            let encoded = serde_json::to_vec(app)?;
            table
                .insert(app.name.as_str(), encoded.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn app(&self, name: &str) -> Result<App> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(APPS).map_err(db_err)?;
        let guard = table.get(name).map_err(db_err)?;
        let Some(value) = guard else {
            return Err(DrydockError::AppNotFound(name.to_string()));
        };
        Ok(serde_json::from_slice(value.value())?)
    }

    fn remove_app(&self, name: &str) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(APPS).map_err(db_err)?;
            table.remove(name).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn save_units(&self, name: &str, units: &[Unit]) -> Result<()> {
        self.update_app(name, |app| app.units = units.to_vec())
    }

    fn save_env(&self, name: &str, env: &BTreeMap<String, EnvVar>) -> Result<()> {
        self.update_app(name, |app| app.env = env.clone())
    }

    fn incr_deploys(&self, name: &str) -> Result<()> {
        self.update_app(name, |app| app.deploys += 1)
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(USERS).map_err(db_err)?;
            let taken = table.get(user.email.as_str()).map_err(db_err)?.is_some();
            if taken {
                return Err(DrydockError::UserExists(user.email.clone()));
            }
            let encoded = serde_json::to_vec(user)?;
            table
                .insert(user.email.as_str(), encoded.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn user(&self, email: &str) -> Result<User> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(USERS).map_err(db_err)?;
        let guard = table.get(email).map_err(db_err)?;
        let Some(value) = guard else {
            return Err(DrydockError::UserNotFound(email.to_string()));
        };
        Ok(serde_json::from_slice(value.value())?)
    }

    fn remove_user(&self, email: &str) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(USERS).map_err(db_err)?;
            table.remove(email).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn quota_of(&self, owner: Owner<'_>) -> Result<Quota> {
        match owner {
            Owner::App(name) => Ok(self.app(name)?.quota),
            Owner::User(email) => Ok(self.user(email)?.quota),
        }
    }

    fn swap_usage(&self, owner: Owner<'_>, expected: u32, new: u32) -> Result<bool> {
        match owner {
            Owner::App(name) => self.swap_app_usage(name, expected, new),
            Owner::User(email) => self.swap_user_usage(email, expected, new),
        }
    }

    fn add_usage(&self, owner: Owner<'_>, amount: u32) -> Result<()> {
        match owner {
            Owner::App(name) => self.update_app(name, |app| app.quota.in_use += amount),
            Owner::User(email) => self.update_user(email, |user| user.quota.in_use += amount),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
