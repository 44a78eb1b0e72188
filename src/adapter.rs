use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// The adapter's error classification. Controls never see a raw provider
/// exception; every call lands in exactly one of these, replacing the
/// source's `except: return []` pattern with something a control can
/// actually branch on.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl CloudError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CloudError::Throttled(_) | CloudError::Transient(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudResource {
    pub kind: String,
    pub id: String,
    pub attributes: Value,
}

#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: String,
    pub resource_id: String,
    pub action: String,
    pub params: Value,
}

/// A thin, provider-specific capability surface. `kind`/`mutation` are
/// opaque strings to the trait itself; each Control only ever asks for the
/// kinds and actions it understands. Real provider SDK wrappers live behind
/// this trait — `InMemoryCloudAdapter` is the reference implementation used
/// for tests and local runs.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    async fn list_resources(&self, kind: &str) -> Result<Vec<CloudResource>, CloudError>;
    async fn describe(&self, kind: &str, id: &str) -> Result<CloudResource, CloudError>;
    async fn apply(&self, mutation: Mutation) -> Result<CloudResource, CloudError>;
}

/// Retries `op` with exponential backoff and jitter on `Throttled`/
/// `Transient` classifications; anything else is surfaced immediately.
pub async fn with_retry<F, Fut, T>(max_attempts: u32, mut op: F) -> Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CloudError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let base_ms = 100u64 * 2u64.pow(attempt);
                let jitter_ms = rand::thread_rng().gen_range(0..base_ms.max(1));
                tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// In-memory reference adapter. Holds a fixture resource inventory mutable
/// through `apply`, enough to drive detect/remediate/rollback end to end
/// without a real provider SDK. One instance is constructed per scan and
/// dropped at scan end — adapters are never shared across scans.
pub struct InMemoryCloudAdapter {
    resources: DashMap<String, Vec<CloudResource>>,
    pub deny_list: DashMap<String, CloudError>,
}

impl InMemoryCloudAdapter {
    pub fn new() -> Self {
        InMemoryCloudAdapter {
            resources: DashMap::new(),
            deny_list: DashMap::new(),
        }
    }

    /// Seeds a fixture inventory resembling a moderately well-run AWS
    /// account with a handful of deliberate violations, for local runs and
    /// tests that want a realistic starting point.
    pub fn with_sample_fixture() -> Self {
        let adapter = Self::new();
        adapter.seed(
            "iam_user",
            vec![
                resource("iam_user", "alice", json!({"mfa_enabled": true})),
                resource("iam_user", "bob", json!({"mfa_enabled": false})),
            ],
        );
        adapter.seed(
            "iam_account_summary",
            vec![resource(
                "iam_account_summary",
                "account",
                json!({"password_policy_present": true, "min_length": 14}),
            )],
        );
        adapter.seed(
            "s3_bucket",
            vec![
                resource(
                    "s3_bucket",
                    "arn:aws:s3:::b1",
                    json!({
                        "block_public_acls": false,
                        "encrypted": false,
                        "versioning_enabled": false,
                        "logging_enabled": false,
                    }),
                ),
                resource(
                    "s3_bucket",
                    "arn:aws:s3:::b2",
                    json!({
                        "block_public_acls": true,
                        "encrypted": true,
                        "versioning_enabled": true,
                        "logging_enabled": true,
                    }),
                ),
            ],
        );
        adapter.seed(
            "cloudtrail",
            vec![resource("cloudtrail", "account-trail", json!({"enabled": true}))],
        );
        adapter.seed(
            "ec2_instance",
            vec![resource(
                "ec2_instance",
                "i-0abc",
                json!({"public_ip": null}),
            )],
        );
        adapter.seed(
            "ec2_volume",
            vec![resource("ec2_volume", "vol-0abc", json!({"encrypted": true}))],
        );
        adapter.seed(
            "security_group",
            vec![resource(
                "security_group",
                "sg-0abc",
                json!({"open_ingress_rules": [{"cidr": "0.0.0.0/0", "port": 22}]}),
            )],
        );
        adapter.seed(
            "kms_key",
            vec![resource("kms_key", "key-0abc", json!({"rotation_enabled": true}))],
        );
        adapter.seed(
            "rds_instance",
            vec![resource(
                "rds_instance",
                "db-0abc",
                json!({"encrypted": true, "publicly_accessible": false, "backup_retention_days": 7}),
            )],
        );
        adapter.seed(
            "vpc",
            vec![resource("vpc", "vpc-0abc", json!({"flow_logs_enabled": true}))],
        );
        adapter.seed(
            "elb",
            vec![resource("elb", "elb-0abc", json!({"access_logs_enabled": true}))],
        );
        adapter.seed(
            "config_recorder",
            vec![resource("config_recorder", "default", json!({"enabled": true}))],
        );
        adapter.seed(
            "guardduty_detector",
            vec![resource("guardduty_detector", "default", json!({"enabled": true}))],
        );
        adapter.seed(
            "sns_topic",
            vec![resource("sns_topic", "topic-0abc", json!({"encrypted": true}))],
        );
        adapter.seed(
            "lambda_function",
            vec![resource(
                "lambda_function",
                "fn-0abc",
                json!({"vpc_config_present": true}),
            )],
        );
        adapter
    }

    pub fn seed(&self, kind: &str, resources: Vec<CloudResource>) {
        self.resources.insert(kind.to_string(), resources);
    }
}

impl Default for InMemoryCloudAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn resource(kind: &str, id: &str, attributes: Value) -> CloudResource {
    CloudResource {
        kind: kind.to_string(),
        id: id.to_string(),
        attributes,
    }
}

#[async_trait]
impl CloudAdapter for InMemoryCloudAdapter {
    async fn list_resources(&self, kind: &str) -> Result<Vec<CloudResource>, CloudError> {
        if let Some(err) = self.deny_list.get(kind) {
            return Err(err.clone());
        }
        Ok(self
            .resources
            .get(kind)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn describe(&self, kind: &str, id: &str) -> Result<CloudResource, CloudError> {
        if let Some(err) = self.deny_list.get(kind) {
            return Err(err.clone());
        }
        self.resources
            .get(kind)
            .and_then(|entry| entry.value().iter().find(|r| r.id == id).cloned())
            .ok_or_else(|| CloudError::NotFound(format!("{kind}/{id}")))
    }

    async fn apply(&self, mutation: Mutation) -> Result<CloudResource, CloudError> {
        if let Some(err) = self.deny_list.get(&mutation.kind) {
            return Err(err.clone());
        }
        let mut entry = self
            .resources
            .get_mut(&mutation.kind)
            .ok_or_else(|| CloudError::NotFound(mutation.kind.clone()))?;
        let resource = entry
            .iter_mut()
            .find(|r| r.id == mutation.resource_id)
            .ok_or_else(|| CloudError::NotFound(mutation.resource_id.clone()))?;

        let attrs = resource
            .attributes
            .as_object_mut()
            .ok_or_else(|| CloudError::Permanent("resource has no attribute map".to_string()))?;

        match mutation.params.as_object() {
            Some(patch) => {
                for (key, value) in patch {
                    attrs.insert(key.clone(), value.clone());
                }
            }
            None => {
                return Err(CloudError::Permanent(
                    "mutation params must be an object".to_string(),
                ))
            }
        }

        Ok(resource.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_patches_attributes_in_place() {
        let adapter = InMemoryCloudAdapter::with_sample_fixture();
        let updated = adapter
            .apply(Mutation {
                kind: "s3_bucket".to_string(),
                resource_id: "arn:aws:s3:::b1".to_string(),
                action: "block_public_access".to_string(),
                params: json!({"block_public_acls": true}),
            })
            .await
            .unwrap();
        assert_eq!(updated.attributes["block_public_acls"], json!(true));

        let described = adapter.describe("s3_bucket", "arn:aws:s3:::b1").await.unwrap();
        assert_eq!(described.attributes["block_public_acls"], json!(true));
    }

    #[tokio::test]
    async fn describe_missing_resource_is_not_found() {
        let adapter = InMemoryCloudAdapter::with_sample_fixture();
        let err = adapter.describe("s3_bucket", "does-not-exist").await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound(_)));
    }

    #[tokio::test]
    async fn with_retry_exhausts_and_surfaces_transient_error() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), CloudError> = with_retry(2, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(CloudError::Transient("throttled upstream".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_permanent_errors() {
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), CloudError> = with_retry(5, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(CloudError::Permanent("malformed request".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
