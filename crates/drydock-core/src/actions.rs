//! Workflow assemblies: the concrete actions wired into the app-creation,
//! unit-scaling, and deploy pipelines.
//!
//! Each constructor receives the collaborators its action touches and
//! captures them in the forward/backward closures — assembly time is the
//! only place wiring happens. Actions read specific positions of the shared
//! parameter list and/or the chained `previous` value; none of them mutates
//! a caller's record through anything but its own declared effect.

use std::sync::Arc;

use crate::app::{self, App, EnvVar, Unit};
use crate::cloud::{self, CloudClient, StorageEnv};
use crate::error::{DrydockError, Result};
use crate::pipeline::{Action, LogSink, Pipeline, Value};
use crate::platform::Platform;
use crate::provision::Provisioner;
use crate::queue::{Message, WorkQueue, BIND_SERVICE, REGENERATE_ENV_AND_START};
use crate::quota;
use crate::repository::RepositoryClient;
use crate::store::{Owner, Store};
use crate::user::User;

// ---------------------------------------------------------------------------
// App creation actions
// ---------------------------------------------------------------------------

/// Reserve one slot of the owning user's app quota. Forward returns the
/// user record so the backward can release exactly that reservation.
pub fn reserve_user_quota(store: &Arc<dyn Store>) -> Action {
    let fw_store = Arc::clone(store);
    let bw_store = Arc::clone(store);
    Action {
        name: "reserve-user-quota",
        min_params: 2,
        forward: Box::new(move |ctx| {
            let _app = ctx.params.app(0)?;
            let owner = ctx.params.user(1)?;
            let user = fw_store.user(&owner.email)?;
            quota::reserve(fw_store.as_ref(), Owner::User(&user.email), 1)?;
            Ok(Value::User(user))
        }),
        backward: Some(Box::new(move |ctx| {
            let user = ctx.fw_result.as_user()?;
            quota::release(bw_store.as_ref(), Owner::User(&user.email), 1)
        })),
    }
}

/// Insert the app record, stamping the configured default unit quota.
/// Backward removes the record.
pub fn insert_record(store: &Arc<dyn Store>, units_per_app: Option<u32>) -> Action {
    let fw_store = Arc::clone(store);
    let bw_store = Arc::clone(store);
    Action {
        name: "insert-record",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let mut app = ctx.params.app(0)?.clone();
            app.quota = crate::quota::Quota {
                limit: units_per_app,
                in_use: 0,
            };
            fw_store.insert_app(&app)?;
            Ok(Value::App(app))
        }),
        backward: Some(Box::new(move |ctx| {
            let app = ctx.fw_result.as_app()?;
            bw_store.remove_app(&app.name)
        })),
    }
}

/// Create the app's cloud identity, named after the app.
pub fn create_cloud_identity(cloud: &Arc<dyn CloudClient>) -> Action {
    let fw_cloud = Arc::clone(cloud);
    let bw_cloud = Arc::clone(cloud);
    Action {
        name: "create-cloud-identity",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.previous.as_app()?;
            let user = fw_cloud.create_user(&app.name)?;
            Ok(Value::CloudUser(user))
        }),
        backward: Some(Box::new(move |ctx| {
            let user = ctx.fw_result.as_cloud_user()?;
            bw_cloud.delete_user(&user.name)
        })),
    }
}

/// Mint an access key for the identity created by the previous action.
pub fn create_access_key(cloud: &Arc<dyn CloudClient>) -> Action {
    let fw_cloud = Arc::clone(cloud);
    let bw_cloud = Arc::clone(cloud);
    Action {
        name: "create-access-key",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let user = ctx.previous.as_cloud_user()?;
            let key = fw_cloud.create_access_key(user)?;
            Ok(Value::AccessKey(key))
        }),
        backward: Some(Box::new(move |ctx| {
            let key = ctx.fw_result.as_access_key()?;
            bw_cloud.delete_access_key(&key.id, &key.user_name)
        })),
    }
}

/// Create the app's bucket and bundle it with the access key into the
/// credentials later exported to units.
pub fn create_storage_bucket(cloud: &Arc<dyn CloudClient>) -> Action {
    let fw_cloud = Arc::clone(cloud);
    let bw_cloud = Arc::clone(cloud);
    Action {
        name: "create-storage-bucket",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let key = ctx.previous.as_access_key()?;
            let bucket = fw_cloud.create_bucket(&app.name)?;
            Ok(Value::Storage(StorageEnv {
                access_key_id: key.id.clone(),
                secret_key: key.secret.clone(),
                bucket: bucket.name,
                endpoint: bucket.endpoint,
                location_constraint: bucket.location_constraint,
            }))
        }),
        backward: Some(Box::new(move |ctx| {
            let storage = ctx.fw_result.as_storage()?;
            bw_cloud.delete_bucket(&storage.bucket)
        })),
    }
}

/// Grant the app's identity access to its bucket. Passes the storage
/// credentials through unchanged.
pub fn attach_policy(cloud: &Arc<dyn CloudClient>) -> Action {
    let fw_cloud = Arc::clone(cloud);
    let bw_cloud = Arc::clone(cloud);
    Action {
        name: "attach-policy",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let storage = ctx.previous.as_storage()?;
            fw_cloud.put_user_policy(
                &app.name,
                &cloud::policy_name(&app.name),
                &cloud::bucket_policy(&storage.bucket),
            )?;
            Ok(ctx.previous.clone())
        }),
        backward: Some(Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            bw_cloud.delete_user_policy(&app.name, &cloud::policy_name(&app.name))
        })),
    }
}

/// Export the platform environment variables into the app record. When the
/// chained value carries storage credentials, the `TSURU_S3_*` set is
/// exported as well. Passes `previous` through unchanged.
pub fn export_environment_variables(store: &Arc<dyn Store>, host: String) -> Action {
    let fw_store = Arc::clone(store);
    let bw_store = Arc::clone(store);
    Action {
        name: "export-environment-variables",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let name = ctx.params.app(0)?.name.clone();
            let mut fetched = fw_store.app(&name)?;
            let token = uuid::Uuid::new_v4().simple().to_string();
            fetched.set_env(EnvVar::private(app::ENV_APP_NAME, name.as_str()));
            fetched.set_env(EnvVar::private(app::ENV_HOST, host.as_str()));
            fetched.set_env(EnvVar::private(app::ENV_APP_TOKEN, token));
            if let Value::Storage(storage) = ctx.previous {
                fetched.set_env(EnvVar::private(
                    app::ENV_S3_ENDPOINT,
                    storage.endpoint.as_str(),
                ));
                fetched.set_env(EnvVar::private(
                    app::ENV_S3_LOCATION_CONSTRAINT,
                    storage.location_constraint.to_string(),
                ));
                fetched.set_env(EnvVar::private(
                    app::ENV_S3_ACCESS_KEY_ID,
                    storage.access_key_id.as_str(),
                ));
                fetched.set_env(EnvVar::private(
                    app::ENV_S3_SECRET_KEY,
                    storage.secret_key.as_str(),
                ));
                fetched.set_env(EnvVar::private(app::ENV_S3_BUCKET, storage.bucket.as_str()));
            }
            fw_store.save_env(&name, &fetched.env)?;
            Ok(ctx.previous.clone())
        }),
        backward: Some(Box::new(move |ctx| {
            let name = &ctx.params.app(0)?.name;
            // The record may already be gone if insert-record unwinds after
            // us; nothing to clean up in that case.
            let Ok(mut fetched) = bw_store.app(name) else {
                return Ok(());
            };
            fetched.unset_env(app::ENV_APP_NAME);
            fetched.unset_env(app::ENV_HOST);
            fetched.unset_env(app::ENV_APP_TOKEN);
            fetched.env.retain(|key, _| !key.starts_with(app::ENV_S3_PREFIX));
            bw_store.save_env(name, &fetched.env)
        })),
    }
}

/// Create the app's source repository, granting access to every team
/// member.
pub fn create_source_repository(repository: &Arc<dyn RepositoryClient>) -> Action {
    let fw_repos = Arc::clone(repository);
    let bw_repos = Arc::clone(repository);
    Action {
        name: "create-source-repository",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            fw_repos.create_repository(&app.name, &app.team_members(), false)?;
            Ok(Value::App(app.clone()))
        }),
        backward: Some(Box::new(move |ctx| {
            let app = ctx.fw_result.as_app()?;
            bw_repos.remove_repository(&app.name)
        })),
    }
}

/// Provision the app at the backend. Backward destroys it.
pub fn provision_compute(provisioner: &Arc<dyn Provisioner>) -> Action {
    let fw_prov = Arc::clone(provisioner);
    let bw_prov = Arc::clone(provisioner);
    Action {
        name: "provision-compute",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            fw_prov.provision(app)?;
            Ok(Value::App(app.clone()))
        }),
        backward: Some(Box::new(move |ctx| {
            let app = ctx.fw_result.as_app()?;
            bw_prov.destroy(app)
        })),
    }
}

/// Hand post-creation work to the queue. The app record is already
/// durable, so enqueue failure is logged and absorbed; delivery is
/// best-effort.
pub fn enqueue_followups(queue: &Arc<dyn WorkQueue>) -> Action {
    let fw_queue = Arc::clone(queue);
    Action {
        name: "enqueue-followups",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let message = Message::new(REGENERATE_ENV_AND_START, vec![app.name.clone()]);
            if let Err(err) = fw_queue.enqueue(&[message]) {
                tracing::warn!(app = %app.name, error = %err, "followup enqueue failed");
            }
            Ok(ctx.previous.clone())
        }),
        backward: None,
    }
}

// ---------------------------------------------------------------------------
// Unit scaling actions
// ---------------------------------------------------------------------------

/// Reserve `count` slots of the app's unit quota. Forward returns the
/// count; backward releases the same amount.
pub fn reserve_unit_quota(store: &Arc<dyn Store>) -> Action {
    let fw_store = Arc::clone(store);
    let bw_store = Arc::clone(store);
    Action {
        name: "reserve-unit-quota",
        min_params: 2,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let count = ctx.params.count(1)?;
            quota::reserve(fw_store.as_ref(), Owner::App(&app.name), count)?;
            Ok(Value::Count(count))
        }),
        backward: Some(Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let count = ctx.fw_result.as_count()?;
            quota::release(bw_store.as_ref(), Owner::App(&app.name), count)
        })),
    }
}

/// Ask the backend for the reserved number of units.
pub fn provision_units(provisioner: &Arc<dyn Provisioner>) -> Action {
    let fw_prov = Arc::clone(provisioner);
    let bw_prov = Arc::clone(provisioner);
    Action {
        name: "provision-units-at-backend",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let count = ctx.previous.as_count()?;
            let units = fw_prov.add_units(app, count)?;
            Ok(Value::Units(units))
        }),
        backward: Some(Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            for unit in ctx.fw_result.as_units()? {
                if let Err(err) = bw_prov.remove_unit(app, &unit.name) {
                    tracing::warn!(
                        app = %app.name,
                        unit = %unit.name,
                        error = %err,
                        "failed to remove unit during rollback"
                    );
                }
            }
            Ok(())
        })),
    }
}

/// Persist the new units on the app record, then enqueue the bind/start
/// messages for each. The enqueue happens only after the unit write has
/// committed, and its failure is logged, not raised.
pub fn persist_units(store: &Arc<dyn Store>, queue: &Arc<dyn WorkQueue>) -> Action {
    let fw_store = Arc::clone(store);
    let fw_queue = Arc::clone(queue);
    Action {
        name: "persist-units-and-enqueue-bind-messages",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let provisioned = ctx.previous.as_units()?;
            let mut fetched = fw_store.app(&app.name)?;
            let mut messages = Vec::with_capacity(provisioned.len() * 2);
            for unit in provisioned {
                fetched.add_unit(Unit::from(unit.clone()));
                messages.push(Message::new(
                    REGENERATE_ENV_AND_START,
                    vec![app.name.clone(), unit.name.clone()],
                ));
                messages.push(Message::new(
                    BIND_SERVICE,
                    vec![app.name.clone(), unit.name.clone()],
                ));
            }
            fw_store.save_units(&app.name, &fetched.units)?;
            if let Err(err) = fw_queue.enqueue(&messages) {
                tracing::warn!(app = %app.name, error = %err, "bind message enqueue failed");
            }
            Ok(ctx.previous.clone())
        }),
        backward: None,
    }
}

// ---------------------------------------------------------------------------
// Deploy actions
// ---------------------------------------------------------------------------

/// Run the backend deploy, streaming its output into the supplied sink.
pub fn provisioner_deploy(provisioner: &Arc<dyn Provisioner>) -> Action {
    let fw_prov = Arc::clone(provisioner);
    Action {
        name: "provisioner-deploy",
        min_params: 3,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            let version = ctx.params.text(1)?;
            let sink = ctx.params.sink(2)?;
            let mut guard = sink.lock().unwrap();
            fw_prov.deploy(app, version, &mut *guard)?;
            Ok(Value::None)
        }),
        backward: None,
    }
}

/// Bump the app record's deploy counter.
pub fn increment_deploy(store: &Arc<dyn Store>) -> Action {
    let fw_store = Arc::clone(store);
    Action {
        name: "increment-deploy",
        min_params: 1,
        forward: Box::new(move |ctx| {
            let app = ctx.params.app(0)?;
            fw_store.incr_deploys(&app.name)?;
            Ok(Value::None)
        }),
        backward: None,
    }
}

// ---------------------------------------------------------------------------
// Assemblies
// ---------------------------------------------------------------------------

/// Create an application owned by `owner`, end to end: quota, record,
/// cloud resources (when a cloud client is configured), environment,
/// repository, compute, followups. On any failure every completed step is
/// compensated and the originating error is returned.
///
/// Returns the freshly-persisted record, environment included.
pub fn create_app(platform: &Platform, app: App, owner: &User) -> Result<App> {
    app::validate_name(&app.name)?;
    let mut actions = vec![
        reserve_user_quota(&platform.store),
        insert_record(&platform.store, platform.config.units_per_app),
    ];
    if let Some(cloud_client) = &platform.cloud {
        actions.push(create_cloud_identity(cloud_client));
        actions.push(create_access_key(cloud_client));
        actions.push(create_storage_bucket(cloud_client));
        actions.push(attach_policy(cloud_client));
    }
    actions.push(export_environment_variables(
        &platform.store,
        platform.config.host.clone(),
    ));
    actions.push(create_source_repository(&platform.repository));
    actions.push(provision_compute(&platform.provisioner));
    actions.push(enqueue_followups(&platform.queue));

    let name = app.name.clone();
    let params = vec![Value::App(app), Value::User(owner.clone())];
    Pipeline::new(actions, params).execute()?;
    platform.store.app(&name)
}

/// Grow `app_name` by `count` units: reserve quota, provision at the
/// backend, persist and announce the new units.
pub fn add_units(platform: &Platform, app_name: &str, count: u32) -> Result<()> {
    if count == 0 {
        return Err(DrydockError::InvalidArgument {
            position: 1,
            expected: "a unit count greater than zero",
        });
    }
    let app = platform.store.app(app_name)?;
    let actions = vec![
        reserve_unit_quota(&platform.store),
        provision_units(&platform.provisioner),
        persist_units(&platform.store, &platform.queue),
    ];
    let params = vec![Value::App(app), Value::Count(count)];
    Pipeline::new(actions, params).execute()?;
    Ok(())
}

/// Deploy `version` of `app_name`, streaming backend output into `sink`.
pub fn deploy(platform: &Platform, app_name: &str, version: &str, sink: LogSink) -> Result<()> {
    let app = platform.store.app(app_name)?;
    let actions = vec![
        provisioner_deploy(&platform.provisioner),
        increment_deploy(&platform.store),
    ];
    let params = vec![
        Value::App(app),
        Value::Text(version.to_string()),
        Value::Sink(sink),
    ];
    Pipeline::new(actions, params).execute()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::UnitState;
    use crate::cloud::{AccessKey, Bucket, CloudUser};
    use crate::config::PlatformConfig;
    use crate::provision::ProvisionedUnit;
    use crate::queue::LocalQueue;
    use crate::quota::Quota;
    use crate::store::RedbStore;
    use crate::user::Team;
    use std::io::Write as _;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type CallLog = Mutex<Vec<String>>;

    #[derive(Default)]
    struct FakeCloud {
        log: CallLog,
    }

    impl FakeCloud {
        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl CloudClient for FakeCloud {
        fn create_user(&self, name: &str) -> crate::Result<CloudUser> {
            self.log.lock().unwrap().push(format!("create_user:{name}"));
            Ok(CloudUser { name: name.into() })
        }

        fn delete_user(&self, name: &str) -> crate::Result<()> {
            self.log.lock().unwrap().push(format!("delete_user:{name}"));
            Ok(())
        }

        fn create_access_key(&self, user: &CloudUser) -> crate::Result<AccessKey> {
            self.log
                .lock()
                .unwrap()
                .push(format!("create_access_key:{}", user.name));
            Ok(AccessKey {
                id: format!("AKI{}", user.name),
                secret: "s3cr3t".into(),
                user_name: user.name.clone(),
            })
        }

        fn delete_access_key(&self, id: &str, user_name: &str) -> crate::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("delete_access_key:{id}:{user_name}"));
            Ok(())
        }

        fn create_bucket(&self, name: &str) -> crate::Result<Bucket> {
            self.log.lock().unwrap().push(format!("create_bucket:{name}"));
            Ok(Bucket {
                name: name.into(),
                endpoint: "https://s3.example.com".into(),
                location_constraint: true,
            })
        }

        fn delete_bucket(&self, name: &str) -> crate::Result<()> {
            self.log.lock().unwrap().push(format!("delete_bucket:{name}"));
            Ok(())
        }

        fn put_user_policy(
            &self,
            user_name: &str,
            policy_name: &str,
            _document: &str,
        ) -> crate::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("put_user_policy:{user_name}:{policy_name}"));
            Ok(())
        }

        fn delete_user_policy(&self, user_name: &str, policy_name: &str) -> crate::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("delete_user_policy:{user_name}:{policy_name}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRepository {
        log: CallLog,
        fail_create: bool,
    }

    impl RepositoryClient for FakeRepository {
        fn create_repository(
            &self,
            name: &str,
            users: &[String],
            _is_public: bool,
        ) -> crate::Result<()> {
            if self.fail_create {
                return Err(DrydockError::Repository("repository server down".into()));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("create:{name}:{}", users.join(",")));
            Ok(())
        }

        fn remove_repository(&self, name: &str) -> crate::Result<()> {
            self.log.lock().unwrap().push(format!("remove:{name}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeProvisioner {
        log: CallLog,
        fail_add_units: bool,
    }

    impl FakeProvisioner {
        fn calls(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Provisioner for FakeProvisioner {
        fn provision(&self, app: &App) -> crate::Result<()> {
            self.log.lock().unwrap().push(format!("provision:{}", app.name));
            Ok(())
        }

        fn destroy(&self, app: &App) -> crate::Result<()> {
            self.log.lock().unwrap().push(format!("destroy:{}", app.name));
            Ok(())
        }

        fn add_units(&self, app: &App, count: u32) -> crate::Result<Vec<ProvisionedUnit>> {
            if self.fail_add_units {
                return Err(DrydockError::Provision("backend has no capacity".into()));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("add_units:{}:{count}", app.name));
            Ok((0..count)
                .map(|i| ProvisionedUnit {
                    name: format!("{}-{i}", app.name),
                    kind: app.framework.clone(),
                    ip: Some(format!("10.0.0.{i}")),
                    machine: Some(i),
                    instance_id: Some(format!("i-{i:04}")),
                })
                .collect())
        }

        fn remove_unit(&self, app: &App, unit_name: &str) -> crate::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("remove_unit:{}:{unit_name}", app.name));
            Ok(())
        }

        fn deploy(
            &self,
            app: &App,
            version: &str,
            sink: &mut dyn std::io::Write,
        ) -> crate::Result<()> {
            writeln!(sink, "deploying {} {version}", app.name)?;
            self.log
                .lock()
                .unwrap()
                .push(format!("deploy:{}:{version}", app.name));
            Ok(())
        }
    }

    struct Harness {
        _dir: TempDir,
        platform: Platform,
        store: Arc<RedbStore>,
        cloud: Arc<FakeCloud>,
        repository: Arc<FakeRepository>,
        provisioner: Arc<FakeProvisioner>,
        queue: Arc<LocalQueue>,
    }

    fn harness(with_cloud: bool, repository: FakeRepository, provisioner: FakeProvisioner) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RedbStore::open(&dir.path().join("test.redb")).unwrap());
        let cloud = Arc::new(FakeCloud::default());
        let repository = Arc::new(repository);
        let provisioner = Arc::new(provisioner);
        let queue = Arc::new(LocalQueue::new());
        let config = PlatformConfig {
            host: "https://paas.example.com".into(),
            units_per_app: Some(4),
            apps_per_user: Some(2),
        };
        let mut platform = Platform::new(
            config,
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            Arc::clone(&repository) as Arc<dyn RepositoryClient>,
            Arc::clone(&queue) as Arc<dyn WorkQueue>,
        );
        if with_cloud {
            platform = platform.with_cloud(Arc::clone(&cloud) as Arc<dyn CloudClient>);
        }
        Harness {
            _dir: dir,
            platform,
            store,
            cloud,
            repository,
            provisioner,
            queue,
        }
    }

    fn seed_user(h: &Harness, email: &str) -> User {
        let user = User::new(email, Quota::limited(2));
        h.store.insert_user(&user).unwrap();
        user
    }

    fn sample_app(name: &str) -> App {
        App::new(name, "python").with_teams(vec![Team::new(
            "core",
            vec!["ann@example.com".into(), "bo@example.com".into()],
        )])
    }

    #[test]
    fn create_app_provisions_the_full_stack() {
        let h = harness(true, FakeRepository::default(), FakeProvisioner::default());
        let owner = seed_user(&h, "ann@example.com");

        let created = create_app(&h.platform, sample_app("blog"), &owner).unwrap();

        // Record carries the configured unit quota and the exported env.
        assert_eq!(created.quota.limit, Some(4));
        assert_eq!(created.env_value(app::ENV_APP_NAME), Some("blog"));
        assert_eq!(
            created.env_value(app::ENV_HOST),
            Some("https://paas.example.com")
        );
        assert!(created.env_value(app::ENV_APP_TOKEN).is_some());
        assert_eq!(created.env_value(app::ENV_S3_BUCKET), Some("blog"));
        assert_eq!(created.env_value(app::ENV_S3_ACCESS_KEY_ID), Some("AKIblog"));
        assert_eq!(created.env_value(app::ENV_S3_SECRET_KEY), Some("s3cr3t"));
        assert_eq!(
            created.env_value(app::ENV_S3_ENDPOINT),
            Some("https://s3.example.com")
        );
        assert_eq!(
            created.env_value(app::ENV_S3_LOCATION_CONSTRAINT),
            Some("true")
        );

        // Owner quota consumed exactly once.
        assert_eq!(h.store.user("ann@example.com").unwrap().quota.in_use, 1);

        // Cloud resources created in order.
        assert_eq!(
            h.cloud.calls(),
            vec![
                "create_user:blog",
                "create_access_key:blog",
                "create_bucket:blog",
                "put_user_policy:blog:app-blog-bucket",
            ]
        );

        // Repository granted to both team members; compute provisioned.
        assert_eq!(
            *h.repository.log.lock().unwrap(),
            vec!["create:blog:ann@example.com,bo@example.com"]
        );
        assert_eq!(h.provisioner.calls(), vec!["provision:blog"]);

        // One followup message, keyed by app name.
        let messages = h.queue.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].action, REGENERATE_ENV_AND_START);
        assert_eq!(messages[0].args, vec!["blog"]);
    }

    #[test]
    fn create_app_without_cloud_skips_storage_exports() {
        let h = harness(false, FakeRepository::default(), FakeProvisioner::default());
        let owner = seed_user(&h, "ann@example.com");

        let created = create_app(&h.platform, sample_app("blog"), &owner).unwrap();

        assert_eq!(created.env_value(app::ENV_APP_NAME), Some("blog"));
        assert!(created.env_value(app::ENV_APP_TOKEN).is_some());
        assert!(!created.env.keys().any(|k| k.starts_with(app::ENV_S3_PREFIX)));
        assert!(h.cloud.calls().is_empty());
    }

    #[test]
    fn create_app_duplicate_name_releases_user_quota() {
        let h = harness(true, FakeRepository::default(), FakeProvisioner::default());
        let owner = seed_user(&h, "ann@example.com");
        h.store.insert_app(&App::new("blog", "ruby")).unwrap();

        let err = create_app(&h.platform, sample_app("blog"), &owner).unwrap_err();
        assert!(matches!(err, DrydockError::AppExists(name) if name == "blog"));

        // The reservation made before the failed insert was compensated,
        // and nothing downstream ever ran.
        assert_eq!(h.store.user("ann@example.com").unwrap().quota.in_use, 0);
        assert!(h.cloud.calls().is_empty());
        assert!(h.provisioner.calls().is_empty());
        assert!(h.queue.is_empty());
        // The pre-existing record survives.
        assert_eq!(h.store.app("blog").unwrap().framework, "ruby");
    }

    #[test]
    fn create_app_repository_failure_unwinds_cloud_and_record() {
        let repository = FakeRepository {
            fail_create: true,
            ..FakeRepository::default()
        };
        let h = harness(true, repository, FakeProvisioner::default());
        let owner = seed_user(&h, "ann@example.com");

        let err = create_app(&h.platform, sample_app("blog"), &owner).unwrap_err();
        assert!(matches!(err, DrydockError::Repository(_)));

        // Cloud teardown runs in strict reverse creation order.
        assert_eq!(
            h.cloud.calls()[4..],
            [
                "delete_user_policy:blog:app-blog-bucket".to_string(),
                "delete_bucket:blog".to_string(),
                "delete_access_key:AKIblog:blog".to_string(),
                "delete_user:blog".to_string(),
            ]
        );
        // Record gone, quota restored, compute never touched.
        assert!(matches!(
            h.store.app("blog").unwrap_err(),
            DrydockError::AppNotFound(_)
        ));
        assert_eq!(h.store.user("ann@example.com").unwrap().quota.in_use, 0);
        assert!(h.provisioner.calls().is_empty());
        assert!(h.queue.is_empty());
    }

    #[test]
    fn create_app_rejects_invalid_names_before_any_work() {
        let h = harness(true, FakeRepository::default(), FakeProvisioner::default());
        let owner = seed_user(&h, "ann@example.com");

        let err = create_app(&h.platform, sample_app("Bad_Name"), &owner).unwrap_err();
        assert!(matches!(err, DrydockError::InvalidName(_)));
        assert_eq!(h.store.user("ann@example.com").unwrap().quota.in_use, 0);
        assert!(h.cloud.calls().is_empty());
    }

    #[test]
    fn add_units_persists_units_and_enqueues_bind_messages() {
        let h = harness(false, FakeRepository::default(), FakeProvisioner::default());
        let mut app = App::new("blog", "python");
        app.quota = Quota::limited(5);
        h.store.insert_app(&app).unwrap();

        add_units(&h.platform, "blog", 2).unwrap();

        let stored = h.store.app("blog").unwrap();
        assert_eq!(stored.quota.in_use, 2);
        assert_eq!(stored.units.len(), 2);
        assert!(stored.units.iter().all(|u| u.state == UnitState::Building));

        let messages = h.queue.drain();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].action, REGENERATE_ENV_AND_START);
        assert_eq!(messages[0].args, vec!["blog", "blog-0"]);
        assert_eq!(messages[1].action, BIND_SERVICE);
        assert_eq!(messages[1].args, vec!["blog", "blog-0"]);
        assert_eq!(messages[2].args, vec!["blog", "blog-1"]);
    }

    #[test]
    fn add_units_over_quota_is_denied_before_the_backend_runs() {
        let h = harness(false, FakeRepository::default(), FakeProvisioner::default());
        let mut app = App::new("blog", "python");
        app.quota = Quota::limited(1);
        h.store.insert_app(&app).unwrap();

        let err = add_units(&h.platform, "blog", 2).unwrap_err();
        assert!(matches!(
            err,
            DrydockError::QuotaExceeded {
                requested: 2,
                available: 1
            }
        ));
        assert!(h.provisioner.calls().is_empty());
        assert!(h.store.app("blog").unwrap().units.is_empty());
    }

    #[test]
    fn add_units_backend_failure_releases_the_reservation() {
        let provisioner = FakeProvisioner {
            fail_add_units: true,
            ..FakeProvisioner::default()
        };
        let h = harness(false, FakeRepository::default(), provisioner);
        let mut app = App::new("blog", "python");
        app.quota = Quota::limited(5);
        h.store.insert_app(&app).unwrap();

        let err = add_units(&h.platform, "blog", 3).unwrap_err();
        assert!(matches!(err, DrydockError::Provision(_)));

        let stored = h.store.app("blog").unwrap();
        assert_eq!(stored.quota.in_use, 0);
        assert!(stored.units.is_empty());
        assert!(h.queue.is_empty());
    }

    #[test]
    fn add_units_zero_is_rejected() {
        let h = harness(false, FakeRepository::default(), FakeProvisioner::default());
        h.store.insert_app(&App::new("blog", "python")).unwrap();
        let err = add_units(&h.platform, "blog", 0).unwrap_err();
        assert!(matches!(
            err,
            DrydockError::InvalidArgument { position: 1, .. }
        ));
    }

    #[test]
    fn add_units_missing_app_is_not_found() {
        let h = harness(false, FakeRepository::default(), FakeProvisioner::default());
        let err = add_units(&h.platform, "ghost", 1).unwrap_err();
        assert!(matches!(err, DrydockError::AppNotFound(_)));
    }

    #[test]
    fn deploy_streams_output_and_increments_the_counter() {
        let h = harness(false, FakeRepository::default(), FakeProvisioner::default());
        h.store.insert_app(&App::new("blog", "python")).unwrap();

        let sink: LogSink = Arc::new(Mutex::new(Vec::<u8>::new()));
        deploy(&h.platform, "blog", "v7", Arc::clone(&sink)).unwrap();

        assert_eq!(h.store.app("blog").unwrap().deploys, 1);
        assert_eq!(h.provisioner.calls(), vec!["deploy:blog:v7"]);
    }
}
