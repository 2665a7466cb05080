//! Application records and their environment-variable surface.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DrydockError, Result};
use crate::quota::Quota;
use crate::user::Team;

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

// Deployed units read these literally; the strings are part of the platform
// contract and must not change.
pub const ENV_APP_NAME: &str = "TSURU_APPNAME";
pub const ENV_HOST: &str = "TSURU_HOST";
pub const ENV_APP_TOKEN: &str = "TSURU_APP_TOKEN";
pub const ENV_S3_PREFIX: &str = "TSURU_S3_";
pub const ENV_S3_ENDPOINT: &str = "TSURU_S3_ENDPOINT";
pub const ENV_S3_LOCATION_CONSTRAINT: &str = "TSURU_S3_LOCATIONCONSTRAINT";
pub const ENV_S3_ACCESS_KEY_ID: &str = "TSURU_S3_ACCESS_KEY_ID";
pub const ENV_S3_SECRET_KEY: &str = "TSURU_S3_SECRET_KEY";
pub const ENV_S3_BUCKET: &str = "TSURU_S3_BUCKET";

// ---------------------------------------------------------------------------
// EnvVar / Unit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub public: bool,
}

impl EnvVar {
    pub fn private(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            public: false,
        }
    }
}

/// Lifecycle state of a compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Provisioned at the backend, not yet serving.
    Building,
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<u32>,
    pub state: UnitState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    pub framework: String,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub units: Vec<Unit>,
    #[serde(default)]
    pub env: BTreeMap<String, EnvVar>,
    #[serde(default)]
    pub quota: Quota,
    #[serde(default)]
    pub deploys: u32,
    pub created_at: DateTime<Utc>,
}

impl App {
    pub fn new(name: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            framework: framework.into(),
            teams: Vec::new(),
            units: Vec::new(),
            env: BTreeMap::new(),
            quota: Quota::unlimited(),
            deploys: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_teams(mut self, teams: Vec<Team>) -> Self {
        self.teams = teams;
        self
    }

    /// Emails of every member across the app's teams, deduplicated in
    /// first-seen order. These are the accounts granted repository access.
    pub fn team_members(&self) -> Vec<String> {
        let mut members = Vec::new();
        for team in &self.teams {
            for user in &team.users {
                if !members.contains(user) {
                    members.push(user.clone());
                }
            }
        }
        members
    }

    /// Add a unit, replacing any existing unit with the same name.
    pub fn add_unit(&mut self, unit: Unit) {
        if let Some(existing) = self.units.iter_mut().find(|u| u.name == unit.name) {
            *existing = unit;
        } else {
            self.units.push(unit);
        }
    }

    pub fn set_env(&mut self, var: EnvVar) {
        self.env.insert(var.name.clone(), var);
    }

    pub fn unset_env(&mut self, name: &str) {
        self.env.remove(name);
    }

    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(|v| v.value.as_str())
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9\-]*$").unwrap())
}

/// App names key every external resource (bucket, repository, cloud
/// identity), so they are restricted to DNS-label-ish slugs.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 || !name_re().is_match(name) {
        return Err(DrydockError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
