//! Command implementations. Each command wires a [`Platform`] against the
//! embedded store, the null provisioner, and the in-process queue — the
//! local-development shape of the control plane.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use drydock_core::actions;
use drydock_core::app::App;
use drydock_core::config::{PlatformConfig, CONFIG_FILE};
use drydock_core::pipeline::LogSink;
use drydock_core::platform::Platform;
use drydock_core::provision::NullProvisioner;
use drydock_core::queue::LocalQueue;
use drydock_core::quota::Quota;
use drydock_core::repository::NullRepository;
use drydock_core::store::{RedbStore, Store};
use drydock_core::user::{Team, User};

const STORE_FILE: &str = "drydock.redb";

/// Build the local platform: config and records under `root`, no cloud
/// client. Constructed once per invocation and shared from there.
fn open_platform(root: &Path) -> anyhow::Result<Platform> {
    let config = PlatformConfig::load_or_default(&root.join(CONFIG_FILE))
        .with_context(|| format!("loading {CONFIG_FILE}"))?;
    let store = RedbStore::open(&root.join(STORE_FILE)).context("opening record store")?;
    Ok(Platform::new(
        config,
        Arc::new(store),
        Arc::new(NullProvisioner),
        Arc::new(NullRepository),
        Arc::new(LocalQueue::new()),
    ))
}

/// Parse a `--team name=member1,member2` argument.
pub fn parse_team(spec: &str) -> Result<Team, String> {
    let (name, members) = spec
        .split_once('=')
        .ok_or_else(|| format!("expected name=member1,member2, got '{spec}'"))?;
    if name.is_empty() {
        return Err("team name must not be empty".into());
    }
    let users = members
        .split(',')
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Team::new(name, users))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn user_create(root: &Path, email: &str) -> anyhow::Result<()> {
    let platform = open_platform(root)?;
    let quota = match platform.config.apps_per_user {
        Some(limit) => Quota::limited(limit),
        None => Quota::unlimited(),
    };
    let user = User::new(email, quota);
    platform.store.insert_user(&user)?;
    print_json(&user)
}

pub fn create(
    root: &Path,
    name: &str,
    framework: &str,
    owner: &str,
    teams: Vec<Team>,
) -> anyhow::Result<()> {
    let platform = open_platform(root)?;
    let owner = platform
        .store
        .user(owner)
        .with_context(|| format!("owner '{owner}' must be registered first"))?;
    let app = App::new(name, framework).with_teams(teams);
    let created = actions::create_app(&platform, app, &owner)?;
    print_json(&created)
}

pub fn add_units(root: &Path, app: &str, count: u32) -> anyhow::Result<()> {
    let platform = open_platform(root)?;
    actions::add_units(&platform, app, count)?;
    print_json(&platform.store.app(app)?)
}

pub fn deploy(root: &Path, app: &str, version: &str) -> anyhow::Result<()> {
    let platform = open_platform(root)?;
    let sink: LogSink = Arc::new(Mutex::new(std::io::stdout()));
    actions::deploy(&platform, app, version, sink)?;
    let mut out = std::io::stdout();
    writeln!(out, "deployed {app} {version}")?;
    Ok(())
}

pub fn info(root: &Path, app: &str) -> anyhow::Result<()> {
    let platform = open_platform(root)?;
    print_json(&platform.store.app(app)?)
}
