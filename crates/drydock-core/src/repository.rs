//! Source-repository service contract.

use crate::error::Result;

pub trait RepositoryClient: Send + Sync {
    /// Create a repository named after the app, granting access to `users`.
    fn create_repository(&self, name: &str, users: &[String], is_public: bool) -> Result<()>;
    fn remove_repository(&self, name: &str) -> Result<()>;
}

/// A client that acknowledges every call without a repository server.
/// Used by the CLI for local walkthroughs.
#[derive(Debug, Default)]
pub struct NullRepository;

impl RepositoryClient for NullRepository {
    fn create_repository(&self, name: &str, users: &[String], _is_public: bool) -> Result<()> {
        tracing::debug!(repository = name, users = users.len(), "repository create skipped");
        Ok(())
    }

    fn remove_repository(&self, name: &str) -> Result<()> {
        tracing::debug!(repository = name, "repository remove skipped");
        Ok(())
    }
}
