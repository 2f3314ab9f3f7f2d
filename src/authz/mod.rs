//! Key resolution for (user, host) logins.

pub mod audit;
mod resolver;

pub use audit::{AuditRecord, AuditSink, LogAudit, RemoteLogger};
pub use resolver::{AuthorizationResolver, Policy, Resolution, ResolveError};
