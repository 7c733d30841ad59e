use capflow_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Forwards engine audit events to the tracing subscriber as structured fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let document_id = event.document_id.as_ref().map_or("unknown", |id| id.as_str());
        let metadata = event
            .metadata
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(" ");

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                document_id = %document_id,
                actor = %event.actor,
                category = ?event.category,
                metadata = %metadata,
                "workflow event"
            ),
            AuditOutcome::Rejected => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                document_id = %document_id,
                actor = %event.actor,
                category = ?event.category,
                metadata = %metadata,
                "workflow request refused"
            ),
            AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                document_id = %document_id,
                actor = %event.actor,
                category = ?event.category,
                metadata = %metadata,
                "workflow request failed"
            ),
        }
    }
}
