pub mod aws;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;

use crate::adapter::{CloudAdapter, CloudError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationRisk {
    Low,
    Medium,
    High,
}

impl RemediationRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationRisk::Low => "low",
            RemediationRisk::Medium => "medium",
            RemediationRisk::High => "high",
        }
    }
}

/// Immutable, once-registered metadata for a Control. The tagged-descriptor
/// + function-table shape the source's class hierarchy is replaced with:
/// this struct is the tag, `Control` below is the function table.
#[derive(Debug, Clone, Serialize)]
pub struct ControlDescriptor {
    pub control_id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub severity: Severity,
    pub category: &'static str,
    pub provider: &'static str,
    /// framework name -> clause identifiers
    pub frameworks: &'static [(&'static str, &'static [&'static str])],
    pub can_auto_remediate: bool,
    pub remediation_risk: RemediationRisk,
    pub references: &'static [&'static str],
}

/// One `(control, resource)` detection outcome before it becomes a
/// persisted Finding. Absence of a seed for a control means PASS.
#[derive(Debug, Clone)]
pub struct FindingSeed {
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub finding_details: Value,
    pub evidence_before: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RemediationInput {
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub evidence_before: Option<Value>,
    pub finding_details: Value,
}

#[derive(Debug, Clone)]
pub struct RemediationResult {
    pub after_state: Value,
    pub rollback_data: Value,
    /// When true, the target state already held and nothing was mutated.
    pub noop: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("control does not implement remediation")]
    NotImplemented,
    #[error("cloud error: {0}")]
    Cloud(#[from] CloudError),
}

/// The function table half of the tagged-descriptor design: `detect` is
/// mandatory, `remediate`/`rollback` default to `NotImplemented` for
/// detect-only controls.
#[async_trait]
pub trait Control: Send + Sync {
    fn descriptor(&self) -> &'static ControlDescriptor;

    async fn detect(
        &self,
        adapter: &dyn CloudAdapter,
    ) -> Result<Vec<FindingSeed>, ControlError>;

    async fn remediate(
        &self,
        _adapter: &dyn CloudAdapter,
        _input: &RemediationInput,
        _dry_run: bool,
    ) -> Result<RemediationResult, ControlError> {
        Err(ControlError::NotImplemented)
    }

    async fn rollback(
        &self,
        _adapter: &dyn CloudAdapter,
        _rollback_data: &Value,
    ) -> Result<RemediationResult, ControlError> {
        Err(ControlError::NotImplemented)
    }
}

/// Process-wide registry, built once at first access and never mutated
/// afterward — the source's module-level `AWS_CONTROLS` list, modeled as a
/// `Lazy` map instead of a runtime-registered collection.
pub static CATALOG: Lazy<Catalog> = Lazy::new(Catalog::bootstrap);

pub struct Catalog {
    controls: HashMap<&'static str, Arc<dyn Control>>,
}

impl Catalog {
    fn bootstrap() -> Self {
        let mut controls: HashMap<&'static str, Arc<dyn Control>> = HashMap::new();
        for control in aws::all_controls() {
            controls.insert(control.descriptor().control_id, control);
        }
        Catalog { controls }
    }

    pub fn get(&self, control_id: &str) -> Option<Arc<dyn Control>> {
        self.controls.get(control_id).cloned()
    }

    pub fn by_provider(&self, provider: &str) -> Vec<Arc<dyn Control>> {
        let mut matches: Vec<_> = self
            .controls
            .values()
            .filter(|c| c.descriptor().provider == provider)
            .cloned()
            .collect();
        matches.sort_by_key(|c| c.descriptor().control_id);
        matches
    }

    pub fn by_provider_filtered(
        &self,
        provider: &str,
        control_ids: Option<&[String]>,
    ) -> Vec<Arc<dyn Control>> {
        let all = self.by_provider(provider);
        match control_ids {
            None => all,
            Some(ids) => all
                .into_iter()
                .filter(|c| ids.iter().any(|id| id == c.descriptor().control_id))
                .collect(),
        }
    }

    pub fn all(&self) -> Vec<Arc<dyn Control>> {
        let mut all: Vec<_> = self.controls.values().cloned().collect();
        all.sort_by_key(|c| c.descriptor().control_id);
        all
    }
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
