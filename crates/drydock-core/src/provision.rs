//! Provisioning backend contract, plus the null backend used for local
//! development and embedding tests.

use std::io::Write;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::App;
use crate::error::Result;

/// A compute unit as described by the backend. The control plane converts
/// these into persisted [`crate::app::Unit`] records in state `building`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedUnit {
    pub name: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl From<ProvisionedUnit> for crate::app::Unit {
    fn from(unit: ProvisionedUnit) -> Self {
        Self {
            name: unit.name,
            kind: unit.kind,
            ip: unit.ip,
            machine: unit.machine,
            state: crate::app::UnitState::Building,
            instance_id: unit.instance_id,
        }
    }
}

/// Turns the abstract "provision / add units / deploy / destroy" contract
/// into real infrastructure calls. Every method may block on network I/O;
/// timeout policy belongs to the implementation.
pub trait Provisioner: Send + Sync {
    fn provision(&self, app: &App) -> Result<()>;
    fn destroy(&self, app: &App) -> Result<()>;
    fn add_units(&self, app: &App, count: u32) -> Result<Vec<ProvisionedUnit>>;
    fn remove_unit(&self, app: &App, unit_name: &str) -> Result<()>;
    fn deploy(&self, app: &App, version: &str, sink: &mut dyn Write) -> Result<()>;
}

// ---------------------------------------------------------------------------
// NullProvisioner
// ---------------------------------------------------------------------------

/// A backend that fabricates unit descriptors without touching any real
/// infrastructure. Used by the CLI for local walkthroughs and by embedders
/// that want the control plane without a backend.
#[derive(Debug, Default)]
pub struct NullProvisioner;

impl Provisioner for NullProvisioner {
    fn provision(&self, _app: &App) -> Result<()> {
        Ok(())
    }

    fn destroy(&self, _app: &App) -> Result<()> {
        Ok(())
    }

    fn add_units(&self, app: &App, count: u32) -> Result<Vec<ProvisionedUnit>> {
        let units = (0..count)
            .map(|_| ProvisionedUnit {
                name: format!("{}-{}", app.name, Uuid::new_v4().simple()),
                kind: app.framework.clone(),
                ip: None,
                machine: None,
                instance_id: None,
            })
            .collect();
        Ok(units)
    }

    fn remove_unit(&self, _app: &App, _unit_name: &str) -> Result<()> {
        Ok(())
    }

    fn deploy(&self, app: &App, version: &str, sink: &mut dyn Write) -> Result<()> {
        writeln!(sink, "deploying {} version {version} (null backend)", app.name)?;
        Ok(())
    }
}
