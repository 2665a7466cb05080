//! User and team records. A user owns the app-count quota that gates how
//! many applications they can create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::Quota;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    #[serde(default)]
    pub quota: Quota,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, quota: Quota) -> Self {
        Self {
            email: email.into(),
            quota,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    /// Member emails.
    #[serde(default)]
    pub users: Vec<String>,
}

impl Team {
    pub fn new(name: impl Into<String>, users: Vec<String>) -> Self {
        Self {
            name: name.into(),
            users,
        }
    }
}
