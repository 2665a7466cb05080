//! Cloud identity/storage client contract: per-app identities, access keys,
//! buckets, and the bucket-scoped policy that ties them together. Consumed
//! by the app-creation pipeline; a deployment wires in a concrete client at
//! platform construction.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudUser {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub secret: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub endpoint: String,
    pub location_constraint: bool,
}

/// Everything a deployed unit needs to reach its bucket, exported as
/// `TSURU_S3_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEnv {
    pub access_key_id: String,
    pub secret_key: String,
    pub bucket: String,
    pub endpoint: String,
    pub location_constraint: bool,
}

pub trait CloudClient: Send + Sync {
    fn create_user(&self, name: &str) -> Result<CloudUser>;
    fn delete_user(&self, name: &str) -> Result<()>;
    fn create_access_key(&self, user: &CloudUser) -> Result<AccessKey>;
    fn delete_access_key(&self, id: &str, user_name: &str) -> Result<()>;
    fn create_bucket(&self, name: &str) -> Result<Bucket>;
    fn delete_bucket(&self, name: &str) -> Result<()>;
    fn put_user_policy(&self, user_name: &str, policy_name: &str, document: &str) -> Result<()>;
    fn delete_user_policy(&self, user_name: &str, policy_name: &str) -> Result<()>;
}

/// Name of the per-app policy granting bucket access.
pub fn policy_name(app_name: &str) -> String {
    format!("app-{app_name}-bucket")
}

/// Policy document granting an app's identity full access to its bucket.
pub fn bucket_policy(bucket: &str) -> String {
    serde_json::json!({
        "Statement": [{
            "Action": ["s3:*"],
            "Effect": "Allow",
            "Resource": [
                format!("arn:aws:s3:::{bucket}"),
                format!("arn:aws:s3:::{bucket}/*"),
            ],
        }]
    })
    .to_string()
}
