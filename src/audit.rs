//! Audit sink (§6 external interfaces): opportunistic execution logging.
//! The orchestrator calls `log_execution` after every attempt; failures are
//! swallowed so a broken audit backend never affects request latency or success.

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub agent_id: String,
    pub provider: Option<String>,
    pub action: String,
    pub status: String,
    pub latency_ms: u64,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_execution(&self, record: AuditRecord);
}

/// Default sink when no audit backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn log_execution(&self, _record: AuditRecord) {}
}

/// Logs the record as a structured `tracing` event. Stands in for a
/// PostgreSQL/row-store writer, which this crate does not ship (no database
/// client is anywhere in the dependency stack).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_execution(&self, record: AuditRecord) {
        tracing::info!(
            request_id = %record.request_id,
            user_id = %record.user_id,
            conversation_id = record.conversation_id.as_deref(),
            agent_id = %record.agent_id,
            provider = record.provider.as_deref(),
            action = %record.action,
            status = %record.status,
            latency_ms = record.latency_ms,
            tokens_input = record.tokens_input,
            tokens_output = record.tokens_output,
            error_message = record.error_message.as_deref(),
            "audit"
        );
    }
}
