//! AWS control catalog, ported from a reference detection-as-code
//! implementation. Each control is a zero-sized struct carrying only
//! behavior; its descriptor is the tagged metadata the Catalog indexes by.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    Control, ControlDescriptor, ControlError, FindingSeed, RemediationInput, RemediationResult,
    RemediationRisk, Severity,
};
use crate::adapter::{CloudAdapter, Mutation};

pub fn all_controls() -> Vec<Arc<dyn Control>> {
    vec![
        Arc::new(IamMfaControl),
        Arc::new(IamPasswordPolicyControl),
        Arc::new(S3PublicAccessControl),
        Arc::new(S3EncryptionControl),
        Arc::new(S3VersioningControl),
        Arc::new(S3LoggingControl),
        Arc::new(CloudTrailEnabledControl),
        Arc::new(Ec2NoPublicIpControl),
        Arc::new(Ec2EbsEncryptionControl),
        Arc::new(SecurityGroupControl),
        Arc::new(KmsRotationControl),
        Arc::new(RdsEncryptionControl),
        Arc::new(RdsNotPublicControl),
        Arc::new(RdsBackupRetentionControl),
        Arc::new(VpcFlowLogsControl),
        Arc::new(ElbAccessLogsControl),
        Arc::new(ConfigRecorderControl),
        Arc::new(GuardDutyControl),
        Arc::new(SnsEncryptionControl),
        Arc::new(LambdaVpcControl),
    ]
}

fn fail(resource_id: &str, resource_type: &str, details: Value, before: Value) -> FindingSeed {
    FindingSeed {
        resource_id: Some(resource_id.to_string()),
        resource_type: Some(resource_type.to_string()),
        finding_details: details,
        evidence_before: Some(before),
    }
}

// ---------------------------------------------------------------------
// AWS-IAM-001 — MFA required
// ---------------------------------------------------------------------

pub struct IamMfaControl;

static IAM_MFA_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-IAM-001",
    title: "MFA Required",
    description: "All IAM users must have multi-factor authentication enabled",
    severity: Severity::Critical,
    category: "IAM",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.9.2.1"]), ("SOC2", &["CC6.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::High,
    references: &[],
};

#[async_trait]
impl Control for IamMfaControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &IAM_MFA_DESCRIPTOR
    }

    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let users = adapter.list_resources("iam_user").await?;
        Ok(users
            .into_iter()
            .filter(|u| !u.attributes["mfa_enabled"].as_bool().unwrap_or(false))
            .map(|u| {
                fail(
                    &u.id,
                    "iam_user",
                    json!({"reason": "MFA not enabled"}),
                    u.attributes.clone(),
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------
// AWS-IAM-003 — password policy
// ---------------------------------------------------------------------

pub struct IamPasswordPolicyControl;

static IAM_PASSWORD_POLICY_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-IAM-003",
    title: "Strong Password Policy",
    description: "Account must enforce a password policy with minimum length 14",
    severity: Severity::High,
    category: "IAM",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.9.4.3"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};

#[async_trait]
impl Control for IamPasswordPolicyControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &IAM_PASSWORD_POLICY_DESCRIPTOR
    }

    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let summaries = adapter.list_resources("iam_account_summary").await?;
        let mut seeds = Vec::new();
        for summary in summaries {
            let present = summary.attributes["password_policy_present"]
                .as_bool()
                .unwrap_or(false);
            let min_length = summary.attributes["min_length"].as_i64().unwrap_or(0);
            if !present || min_length < 14 {
                seeds.push(fail(
                    &summary.id,
                    "iam_account_summary",
                    json!({"reason": "password policy missing or too weak", "min_length": min_length}),
                    summary.attributes.clone(),
                ));
            }
        }
        Ok(seeds)
    }
}

// ---------------------------------------------------------------------
// AWS-S3-001 — block public access (remediable)
// ---------------------------------------------------------------------

pub struct S3PublicAccessControl;

static S3_PUBLIC_ACCESS_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-S3-001",
    title: "Block Public Access",
    description: "S3 buckets must block public access",
    severity: Severity::Critical,
    category: "Storage",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.13.1.3"]), ("GDPR", &["Art.32"])],
    can_auto_remediate: true,
    remediation_risk: RemediationRisk::High,
    references: &[],
};

#[async_trait]
impl Control for S3PublicAccessControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &S3_PUBLIC_ACCESS_DESCRIPTOR
    }

    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let buckets = adapter.list_resources("s3_bucket").await?;
        Ok(buckets
            .into_iter()
            .filter(|b| !b.attributes["block_public_acls"].as_bool().unwrap_or(false))
            .map(|b| {
                fail(
                    &b.id,
                    "s3_bucket",
                    json!({"reason": "public access not blocked"}),
                    b.attributes.clone(),
                )
            })
            .collect())
    }

    async fn remediate(
        &self,
        adapter: &dyn CloudAdapter,
        input: &RemediationInput,
        dry_run: bool,
    ) -> Result<RemediationResult, ControlError> {
        let resource_id = input
            .resource_id
            .clone()
            .ok_or(ControlError::NotImplemented)?;

        let current = adapter.describe("s3_bucket", &resource_id).await?;
        let already_blocked = current.attributes["block_public_acls"].as_bool().unwrap_or(false);
        if already_blocked {
            return Ok(RemediationResult {
                after_state: current.attributes.clone(),
                rollback_data: rollback_token(&resource_id, &current.attributes),
                noop: true,
            });
        }

        let rollback_data = rollback_token(&resource_id, &current.attributes);
        if dry_run {
            return Ok(RemediationResult {
                after_state: json!({"block_public_acls": true}),
                rollback_data,
                noop: false,
            });
        }

        let updated = adapter
            .apply(Mutation {
                kind: "s3_bucket".to_string(),
                resource_id: resource_id.clone(),
                action: "block_public_access".to_string(),
                params: json!({"block_public_acls": true}),
            })
            .await?;

        Ok(RemediationResult {
            after_state: updated.attributes,
            rollback_data,
            noop: false,
        })
    }

    async fn rollback(
        &self,
        adapter: &dyn CloudAdapter,
        rollback_data: &Value,
    ) -> Result<RemediationResult, ControlError> {
        let resource_id = rollback_data["resource_id"]
            .as_str()
            .ok_or(ControlError::NotImplemented)?
            .to_string();
        let prior = rollback_data["prior_attributes"].clone();

        let current = adapter.describe("s3_bucket", &resource_id).await?;
        if current.attributes == prior {
            return Ok(RemediationResult {
                after_state: current.attributes,
                rollback_data: rollback_data.clone(),
                noop: true,
            });
        }

        let updated = adapter
            .apply(Mutation {
                kind: "s3_bucket".to_string(),
                resource_id,
                action: "restore".to_string(),
                params: prior,
            })
            .await?;

        Ok(RemediationResult {
            after_state: updated.attributes,
            rollback_data: rollback_data.clone(),
            noop: false,
        })
    }
}

fn rollback_token(resource_id: &str, prior_attributes: &Value) -> Value {
    json!({"resource_id": resource_id, "prior_attributes": prior_attributes})
}

// ---------------------------------------------------------------------
// AWS-S3-002 — encryption (remediable)
// ---------------------------------------------------------------------

pub struct S3EncryptionControl;

static S3_ENCRYPTION_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-S3-002",
    title: "Bucket Encryption",
    description: "S3 buckets must have default encryption enabled",
    severity: Severity::High,
    category: "Storage",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.10.1.1"]), ("SOC2", &["CC6.7"])],
    can_auto_remediate: true,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};

#[async_trait]
impl Control for S3EncryptionControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &S3_ENCRYPTION_DESCRIPTOR
    }

    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let buckets = adapter.list_resources("s3_bucket").await?;
        Ok(buckets
            .into_iter()
            .filter(|b| !b.attributes["encrypted"].as_bool().unwrap_or(false))
            .map(|b| {
                fail(
                    &b.id,
                    "s3_bucket",
                    json!({"reason": "default encryption disabled"}),
                    b.attributes.clone(),
                )
            })
            .collect())
    }

    async fn remediate(
        &self,
        adapter: &dyn CloudAdapter,
        input: &RemediationInput,
        dry_run: bool,
    ) -> Result<RemediationResult, ControlError> {
        let resource_id = input
            .resource_id
            .clone()
            .ok_or(ControlError::NotImplemented)?;
        let current = adapter.describe("s3_bucket", &resource_id).await?;
        if current.attributes["encrypted"].as_bool().unwrap_or(false) {
            return Ok(RemediationResult {
                after_state: current.attributes.clone(),
                rollback_data: rollback_token(&resource_id, &current.attributes),
                noop: true,
            });
        }

        let rollback_data = rollback_token(&resource_id, &current.attributes);
        if dry_run {
            return Ok(RemediationResult {
                after_state: json!({"encrypted": true}),
                rollback_data,
                noop: false,
            });
        }

        let updated = adapter
            .apply(Mutation {
                kind: "s3_bucket".to_string(),
                resource_id,
                action: "enable_encryption".to_string(),
                params: json!({"encrypted": true}),
            })
            .await?;

        Ok(RemediationResult {
            after_state: updated.attributes,
            rollback_data,
            noop: false,
        })
    }

    async fn rollback(
        &self,
        adapter: &dyn CloudAdapter,
        rollback_data: &Value,
    ) -> Result<RemediationResult, ControlError> {
        let resource_id = rollback_data["resource_id"]
            .as_str()
            .ok_or(ControlError::NotImplemented)?
            .to_string();
        let prior = rollback_data["prior_attributes"].clone();
        let updated = adapter
            .apply(Mutation {
                kind: "s3_bucket".to_string(),
                resource_id,
                action: "restore".to_string(),
                params: prior,
            })
            .await?;
        Ok(RemediationResult {
            after_state: updated.attributes,
            rollback_data: rollback_data.clone(),
            noop: false,
        })
    }
}

// ---------------------------------------------------------------------
// Remaining detect-only controls
// ---------------------------------------------------------------------

pub struct S3VersioningControl;
static S3_VERSIONING_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-S3-003",
    title: "Bucket Versioning",
    description: "S3 buckets must have versioning enabled",
    severity: Severity::Medium,
    category: "Storage",
    provider: "aws",
    frameworks: &[("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for S3VersioningControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &S3_VERSIONING_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let buckets = adapter.list_resources("s3_bucket").await?;
        Ok(buckets
            .into_iter()
            .filter(|b| !b.attributes["versioning_enabled"].as_bool().unwrap_or(false))
            .map(|b| fail(&b.id, "s3_bucket", json!({"reason": "versioning disabled"}), b.attributes.clone()))
            .collect())
    }
}

pub struct S3LoggingControl;
static S3_LOGGING_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-S3-004",
    title: "Bucket Access Logging",
    description: "S3 buckets must have access logging enabled",
    severity: Severity::Low,
    category: "Storage",
    provider: "aws",
    frameworks: &[("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for S3LoggingControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &S3_LOGGING_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let buckets = adapter.list_resources("s3_bucket").await?;
        Ok(buckets
            .into_iter()
            .filter(|b| !b.attributes["logging_enabled"].as_bool().unwrap_or(false))
            .map(|b| fail(&b.id, "s3_bucket", json!({"reason": "access logging disabled"}), b.attributes.clone()))
            .collect())
    }
}

pub struct CloudTrailEnabledControl;
static CLOUDTRAIL_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-CT-001",
    title: "CloudTrail Enabled",
    description: "CloudTrail must be enabled account-wide",
    severity: Severity::Critical,
    category: "Logging",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.12.4.1"]), ("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};
#[async_trait]
impl Control for CloudTrailEnabledControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &CLOUDTRAIL_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let trails = adapter.list_resources("cloudtrail").await?;
        Ok(trails
            .into_iter()
            .filter(|t| !t.attributes["enabled"].as_bool().unwrap_or(false))
            .map(|t| fail(&t.id, "cloudtrail", json!({"reason": "CloudTrail disabled"}), t.attributes.clone()))
            .collect())
    }
}

pub struct Ec2NoPublicIpControl;
static EC2_NO_PUBLIC_IP_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-EC2-001",
    title: "No Public IPs",
    description: "EC2 instances must not have a public IP address",
    severity: Severity::High,
    category: "Network",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.13.1.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::High,
    references: &[],
};
#[async_trait]
impl Control for Ec2NoPublicIpControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &EC2_NO_PUBLIC_IP_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let instances = adapter.list_resources("ec2_instance").await?;
        Ok(instances
            .into_iter()
            .filter(|i| !i.attributes["public_ip"].is_null())
            .map(|i| fail(&i.id, "ec2_instance", json!({"reason": "instance has a public IP", "public_ip": i.attributes["public_ip"]}), i.attributes.clone()))
            .collect())
    }
}

pub struct Ec2EbsEncryptionControl;
static EC2_EBS_ENCRYPTION_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-EC2-002",
    title: "EBS Volume Encryption",
    description: "EBS volumes must be encrypted",
    severity: Severity::High,
    category: "Storage",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.10.1.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};
#[async_trait]
impl Control for Ec2EbsEncryptionControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &EC2_EBS_ENCRYPTION_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let volumes = adapter.list_resources("ec2_volume").await?;
        Ok(volumes
            .into_iter()
            .filter(|v| !v.attributes["encrypted"].as_bool().unwrap_or(false))
            .map(|v| fail(&v.id, "ec2_volume", json!({"reason": "volume not encrypted"}), v.attributes.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------
// AWS-SG-001 — no open ingress from 0.0.0.0/0 (remediable, a supplement
// beyond the source, which only ever detects this — see DESIGN.md)
// ---------------------------------------------------------------------

pub struct SecurityGroupControl;
static SECURITY_GROUP_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-SG-001",
    title: "No Open Ingress",
    description: "Security groups must not allow ingress from 0.0.0.0/0",
    severity: Severity::Critical,
    category: "Network",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.13.1.1"]), ("SOC2", &["CC6.6"])],
    can_auto_remediate: true,
    remediation_risk: RemediationRisk::High,
    references: &[],
};
#[async_trait]
impl Control for SecurityGroupControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &SECURITY_GROUP_DESCRIPTOR
    }

    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let groups = adapter.list_resources("security_group").await?;
        Ok(groups
            .into_iter()
            .filter(|g| {
                g.attributes["open_ingress_rules"]
                    .as_array()
                    .map(|rules| !rules.is_empty())
                    .unwrap_or(false)
            })
            .map(|g| {
                fail(
                    &g.id,
                    "security_group",
                    json!({"reason": "open ingress from 0.0.0.0/0", "rules": g.attributes["open_ingress_rules"]}),
                    g.attributes.clone(),
                )
            })
            .collect())
    }

    async fn remediate(
        &self,
        adapter: &dyn CloudAdapter,
        input: &RemediationInput,
        dry_run: bool,
    ) -> Result<RemediationResult, ControlError> {
        let resource_id = input
            .resource_id
            .clone()
            .ok_or(ControlError::NotImplemented)?;
        let current = adapter.describe("security_group", &resource_id).await?;
        let rules_empty = current.attributes["open_ingress_rules"]
            .as_array()
            .map(|r| r.is_empty())
            .unwrap_or(true);
        if rules_empty {
            return Ok(RemediationResult {
                after_state: current.attributes.clone(),
                rollback_data: rollback_token(&resource_id, &current.attributes),
                noop: true,
            });
        }

        let rollback_data = rollback_token(&resource_id, &current.attributes);
        if dry_run {
            return Ok(RemediationResult {
                after_state: json!({"open_ingress_rules": []}),
                rollback_data,
                noop: false,
            });
        }

        let updated = adapter
            .apply(Mutation {
                kind: "security_group".to_string(),
                resource_id,
                action: "revoke_open_ingress".to_string(),
                params: json!({"open_ingress_rules": []}),
            })
            .await?;

        Ok(RemediationResult {
            after_state: updated.attributes,
            rollback_data,
            noop: false,
        })
    }

    async fn rollback(
        &self,
        adapter: &dyn CloudAdapter,
        rollback_data: &Value,
    ) -> Result<RemediationResult, ControlError> {
        let resource_id = rollback_data["resource_id"]
            .as_str()
            .ok_or(ControlError::NotImplemented)?
            .to_string();
        let prior = rollback_data["prior_attributes"].clone();
        let updated = adapter
            .apply(Mutation {
                kind: "security_group".to_string(),
                resource_id,
                action: "restore".to_string(),
                params: prior,
            })
            .await?;
        Ok(RemediationResult {
            after_state: updated.attributes,
            rollback_data: rollback_data.clone(),
            noop: false,
        })
    }
}

pub struct KmsRotationControl;
static KMS_ROTATION_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-KMS-001",
    title: "KMS Key Rotation",
    description: "Customer-managed KMS keys must have rotation enabled",
    severity: Severity::Medium,
    category: "Encryption",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.10.1.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for KmsRotationControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &KMS_ROTATION_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let keys = adapter.list_resources("kms_key").await?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.attributes["rotation_enabled"].as_bool().unwrap_or(false))
            .map(|k| fail(&k.id, "kms_key", json!({"reason": "key rotation disabled"}), k.attributes.clone()))
            .collect())
    }
}

pub struct RdsEncryptionControl;
static RDS_ENCRYPTION_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-RDS-001",
    title: "RDS Encryption",
    description: "RDS instances must be encrypted at rest",
    severity: Severity::High,
    category: "Storage",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.10.1.1"]), ("GDPR", &["Art.32"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};
#[async_trait]
impl Control for RdsEncryptionControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &RDS_ENCRYPTION_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let instances = adapter.list_resources("rds_instance").await?;
        Ok(instances
            .into_iter()
            .filter(|i| !i.attributes["encrypted"].as_bool().unwrap_or(false))
            .map(|i| fail(&i.id, "rds_instance", json!({"reason": "instance not encrypted"}), i.attributes.clone()))
            .collect())
    }
}

pub struct RdsNotPublicControl;
static RDS_NOT_PUBLIC_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-RDS-002",
    title: "RDS Not Publicly Accessible",
    description: "RDS instances must not be publicly accessible",
    severity: Severity::Critical,
    category: "Network",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.13.1.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::High,
    references: &[],
};
#[async_trait]
impl Control for RdsNotPublicControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &RDS_NOT_PUBLIC_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let instances = adapter.list_resources("rds_instance").await?;
        Ok(instances
            .into_iter()
            .filter(|i| i.attributes["publicly_accessible"].as_bool().unwrap_or(false))
            .map(|i| fail(&i.id, "rds_instance", json!({"reason": "instance is publicly accessible"}), i.attributes.clone()))
            .collect())
    }
}

pub struct RdsBackupRetentionControl;
static RDS_BACKUP_RETENTION_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-RDS-003",
    title: "RDS Backup Retention",
    description: "RDS instances must retain automated backups for at least 7 days",
    severity: Severity::Medium,
    category: "Resilience",
    provider: "aws",
    frameworks: &[("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for RdsBackupRetentionControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &RDS_BACKUP_RETENTION_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let instances = adapter.list_resources("rds_instance").await?;
        Ok(instances
            .into_iter()
            .filter(|i| i.attributes["backup_retention_days"].as_i64().unwrap_or(0) < 7)
            .map(|i| fail(&i.id, "rds_instance", json!({"reason": "backup retention below 7 days"}), i.attributes.clone()))
            .collect())
    }
}

pub struct VpcFlowLogsControl;
static VPC_FLOW_LOGS_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-VPC-001",
    title: "VPC Flow Logs",
    description: "VPCs must have flow logs enabled",
    severity: Severity::Medium,
    category: "Logging",
    provider: "aws",
    frameworks: &[("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for VpcFlowLogsControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &VPC_FLOW_LOGS_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let vpcs = adapter.list_resources("vpc").await?;
        Ok(vpcs
            .into_iter()
            .filter(|v| !v.attributes["flow_logs_enabled"].as_bool().unwrap_or(false))
            .map(|v| fail(&v.id, "vpc", json!({"reason": "flow logs disabled"}), v.attributes.clone()))
            .collect())
    }
}

pub struct ElbAccessLogsControl;
static ELB_ACCESS_LOGS_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-ELB-001",
    title: "Load Balancer Access Logs",
    description: "Load balancers must have access logging enabled",
    severity: Severity::Low,
    category: "Logging",
    provider: "aws",
    frameworks: &[("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for ElbAccessLogsControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &ELB_ACCESS_LOGS_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let elbs = adapter.list_resources("elb").await?;
        Ok(elbs
            .into_iter()
            .filter(|e| !e.attributes["access_logs_enabled"].as_bool().unwrap_or(false))
            .map(|e| fail(&e.id, "elb", json!({"reason": "access logging disabled"}), e.attributes.clone()))
            .collect())
    }
}

pub struct ConfigRecorderControl;
static CONFIG_RECORDER_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-CONFIG-001",
    title: "AWS Config Recorder Enabled",
    description: "AWS Config must be recording resource changes account-wide",
    severity: Severity::High,
    category: "Logging",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.12.4.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};
#[async_trait]
impl Control for ConfigRecorderControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &CONFIG_RECORDER_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let recorders = adapter.list_resources("config_recorder").await?;
        Ok(recorders
            .into_iter()
            .filter(|r| !r.attributes["enabled"].as_bool().unwrap_or(false))
            .map(|r| fail(&r.id, "config_recorder", json!({"reason": "config recorder disabled"}), r.attributes.clone()))
            .collect())
    }
}

pub struct GuardDutyControl;
static GUARDDUTY_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-GD-001",
    title: "GuardDuty Enabled",
    description: "GuardDuty threat detection must be enabled",
    severity: Severity::High,
    category: "Monitoring",
    provider: "aws",
    frameworks: &[("SOC2", &["CC7.2"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};
#[async_trait]
impl Control for GuardDutyControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &GUARDDUTY_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let detectors = adapter.list_resources("guardduty_detector").await?;
        Ok(detectors
            .into_iter()
            .filter(|d| !d.attributes["enabled"].as_bool().unwrap_or(false))
            .map(|d| fail(&d.id, "guardduty_detector", json!({"reason": "GuardDuty disabled"}), d.attributes.clone()))
            .collect())
    }
}

pub struct SnsEncryptionControl;
static SNS_ENCRYPTION_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-SNS-001",
    title: "SNS Topic Encryption",
    description: "SNS topics must be encrypted at rest",
    severity: Severity::Medium,
    category: "Encryption",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.10.1.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Low,
    references: &[],
};
#[async_trait]
impl Control for SnsEncryptionControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &SNS_ENCRYPTION_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let topics = adapter.list_resources("sns_topic").await?;
        Ok(topics
            .into_iter()
            .filter(|t| !t.attributes["encrypted"].as_bool().unwrap_or(false))
            .map(|t| fail(&t.id, "sns_topic", json!({"reason": "topic not encrypted"}), t.attributes.clone()))
            .collect())
    }
}

pub struct LambdaVpcControl;
static LAMBDA_VPC_DESCRIPTOR: ControlDescriptor = ControlDescriptor {
    control_id: "AWS-LAMBDA-001",
    title: "Lambda in VPC",
    description: "Lambda functions handling sensitive data must run inside a VPC",
    severity: Severity::Medium,
    category: "Network",
    provider: "aws",
    frameworks: &[("ISO27001", &["A.13.1.1"])],
    can_auto_remediate: false,
    remediation_risk: RemediationRisk::Medium,
    references: &[],
};
#[async_trait]
impl Control for LambdaVpcControl {
    fn descriptor(&self) -> &'static ControlDescriptor {
        &LAMBDA_VPC_DESCRIPTOR
    }
    async fn detect(&self, adapter: &dyn CloudAdapter) -> Result<Vec<FindingSeed>, ControlError> {
        let functions = adapter.list_resources("lambda_function").await?;
        Ok(functions
            .into_iter()
            .filter(|f| !f.attributes["vpc_config_present"].as_bool().unwrap_or(false))
            .map(|f| fail(&f.id, "lambda_function", json!({"reason": "function not attached to a VPC"}), f.attributes.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::InMemoryCloudAdapter;

    #[tokio::test]
    async fn s3_public_access_flags_bucket_b1_only() {
        let adapter = InMemoryCloudAdapter::with_sample_fixture();
        let seeds = S3PublicAccessControl.detect(&adapter).await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].resource_id.as_deref(), Some("arn:aws:s3:::b1"));
    }

    #[tokio::test]
    async fn s3_public_access_remediate_then_rollback_round_trips() {
        let adapter = InMemoryCloudAdapter::with_sample_fixture();
        let seed = &S3PublicAccessControl.detect(&adapter).await.unwrap()[0];
        let input = RemediationInput {
            resource_id: seed.resource_id.clone(),
            resource_type: seed.resource_type.clone(),
            evidence_before: seed.evidence_before.clone(),
            finding_details: seed.finding_details.clone(),
        };

        let fixed = S3PublicAccessControl
            .remediate(&adapter, &input, false)
            .await
            .unwrap();
        assert!(!fixed.noop);
        assert_eq!(fixed.after_state["block_public_acls"], json!(true));

        let noop = S3PublicAccessControl
            .remediate(&adapter, &input, false)
            .await
            .unwrap();
        assert!(noop.noop);

        let rolled_back = S3PublicAccessControl
            .rollback(&adapter, &fixed.rollback_data)
            .await
            .unwrap();
        assert!(!rolled_back.noop);
        assert_eq!(rolled_back.after_state, seed.evidence_before.clone().unwrap());
    }

    #[tokio::test]
    async fn iam_mfa_flags_only_bob() {
        let adapter = InMemoryCloudAdapter::with_sample_fixture();
        let seeds = IamMfaControl.detect(&adapter).await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].resource_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn catalog_registers_all_twenty_controls() {
        let controls = all_controls();
        assert_eq!(controls.len(), 20);
        let ids: std::collections::HashSet<_> =
            controls.iter().map(|c| c.descriptor().control_id).collect();
        assert_eq!(ids.len(), 20, "control ids must be unique");
    }
}
