use once_cell::sync::Lazy;

/// Postgres connection string. Must be set via the `DATABASE_URL` env variable.
pub static DATABASE_URL: Lazy<String> =
    Lazy::new(|| std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"));

/// Root directory backing the local evidence/report object-store stand-in.
/// Defaults to `./evidence-store`.
pub static EVIDENCE_STORE_ROOT: Lazy<String> = Lazy::new(|| {
    std::env::var("EVIDENCE_STORE_ROOT").unwrap_or_else(|_| "./evidence-store".to_string())
});

/// Default AWS region assumed when a cloud account does not specify one.
pub static DEFAULT_REGION: Lazy<String> =
    Lazy::new(|| std::env::var("DEFAULT_REGION").unwrap_or_else(|_| "us-east-1".to_string()));

/// Number of days audit log entries are retained before a retention job may
/// archive them. Retention enforcement itself is out of scope; this value is
/// surfaced for a future job to consume.
pub static AUDIT_RETENTION_DAYS: Lazy<u32> = Lazy::new(|| {
    std::env::var("AUDIT_RETENTION_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(365)
});

/// Maximum number of controls evaluated concurrently within a single scan.
pub static SCAN_CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    std::env::var("SCAN_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8)
});

/// Maximum number of scans running concurrently across all accounts.
pub static GLOBAL_SCAN_CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    std::env::var("GLOBAL_SCAN_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(32)
});

/// Per-control detection timeout, in seconds.
pub static CONTROL_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("CONTROL_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60)
});

/// Per-remediation execution timeout, in seconds.
pub static REMEDIATION_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("REMEDIATION_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(120)
});

/// Ceiling on total scan wall-clock time, in seconds, past which the scan is
/// marked as timed out and any in-flight controls are cancelled.
pub static SCAN_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SCAN_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30 * 60)
});

/// HMAC key chaining audit log entries together. Must be set via the
/// `AUDIT_CHAIN_KEY` env variable; treated as a secret, never logged.
pub static AUDIT_CHAIN_KEY: Lazy<String> =
    Lazy::new(|| std::env::var("AUDIT_CHAIN_KEY").expect("AUDIT_CHAIN_KEY must be set"));

/// HMAC key used to sign Evidence Store download URLs. Must be set via the
/// `EVIDENCE_URL_SIGNING_KEY` env variable.
pub static EVIDENCE_URL_SIGNING_KEY: Lazy<String> = Lazy::new(|| {
    std::env::var("EVIDENCE_URL_SIGNING_KEY").expect("EVIDENCE_URL_SIGNING_KEY must be set")
});

pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
});

/// When set, a failed migration run logs a warning instead of aborting
/// startup — useful for local iteration against a partially-migrated
/// database. Defaults to false.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
});
