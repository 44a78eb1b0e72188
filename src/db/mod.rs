pub mod audit_logs;
pub mod cloud_accounts;
pub mod controls;
pub mod findings;
pub mod organizations;

pub use audit_logs::AuditLog;
pub use cloud_accounts::CloudAccount;
pub use controls::ControlRow;
pub use findings::Finding;
pub use organizations::Organization;
