//! Explicit collaborator wiring for the control plane.
//!
//! There are no global registries: every external system the workflows
//! touch is handed to the action constructors through a [`Platform`].
//! Construct one at process startup and clone it freely — clones share the
//! underlying collaborators.

use std::sync::Arc;

use crate::cloud::CloudClient;
use crate::config::PlatformConfig;
use crate::provision::Provisioner;
use crate::queue::WorkQueue;
use crate::repository::RepositoryClient;
use crate::store::Store;

#[derive(Clone)]
pub struct Platform {
    pub config: PlatformConfig,
    pub store: Arc<dyn Store>,
    pub provisioner: Arc<dyn Provisioner>,
    pub repository: Arc<dyn RepositoryClient>,
    pub queue: Arc<dyn WorkQueue>,
    /// Cloud identity/storage client. When absent, app creation skips the
    /// identity/bucket/policy steps and exports no storage credentials.
    pub cloud: Option<Arc<dyn CloudClient>>,
}

impl Platform {
    pub fn new(
        config: PlatformConfig,
        store: Arc<dyn Store>,
        provisioner: Arc<dyn Provisioner>,
        repository: Arc<dyn RepositoryClient>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config,
            store,
            provisioner,
            repository,
            queue,
            cloud: None,
        }
    }

    pub fn with_cloud(mut self, cloud: Arc<dyn CloudClient>) -> Self {
        self.cloud = Some(cloud);
        self
    }
}
