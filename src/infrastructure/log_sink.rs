//! Notifier and audit sinks that write to the tracing output. Used by the
//! simulator binary, where there is no mail service or audit table.

use crate::domain::event::AuditEntry;
use crate::domain::notification::Notification;
use crate::domain::ports::{AuditLog, Notifier};
use crate::error::Result;
use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<()> {
        let body = serde_json::to_string(&notification)?;
        info!(template = notification.template(), %body, "Notification dispatched");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditLog;

#[async_trait]
impl AuditLog for LogAuditLog {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        warn!(
            event = %entry.event,
            reference = entry.reference.as_deref().unwrap_or("-"),
            outcome = ?entry.outcome,
            detail = entry.detail.as_deref().unwrap_or(""),
            "Webhook audit"
        );
        Ok(())
    }
}
