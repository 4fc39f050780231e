use chrono::{DateTime, Utc};
use flume::{bounded, Receiver, Sender};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Emitted once per completed query, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct QueryEvent {
    pub query_id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub organization_id: String,
    pub question: String,
    pub answer_length: usize,
    pub response_time_ms: u64,
    pub source_chunk_ids: Vec<String>,
    pub humanized: bool,
    pub success: bool,
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Analytics sink contract: non-blocking, fire-and-forget. Failures are the
/// sink's problem, never the caller's.
pub trait AnalyticsSink: Send + Sync {
    fn emit(&self, event: QueryEvent);
}

/// Drops everything; the test default.
pub struct NoopSink;

impl AnalyticsSink for NoopSink {
    fn emit(&self, _event: QueryEvent) {}
}

/// Writes events to the structured log stream.
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn emit(&self, event: QueryEvent) {
        info!(
            query_id = %event.query_id,
            org = %event.organization_id,
            user = %event.user_id,
            response_time_ms = event.response_time_ms,
            answer_length = event.answer_length,
            sources = event.source_chunk_ids.len(),
            humanized = event.humanized,
            success = event.success,
            error_kind = event.error_kind.as_deref().unwrap_or(""),
            "query_event"
        );
    }
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
        }
    }
}

/// Postgres sink: a bounded queue drained by a background worker in batches.
/// A full queue drops events with a warning rather than applying backpressure
/// to the query path.
pub struct PgAnalyticsSink {
    sender: Sender<QueryEvent>,
}

impl PgAnalyticsSink {
    pub fn new(pool: PgPool, config: SinkConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Starting analytics sink: queue={}, batch={}, timeout={}ms",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms
        );

        tokio::spawn(async move {
            Self::worker_loop(pool, receiver, config).await;
        });

        Self { sender }
    }

    async fn worker_loop(pool: PgPool, receiver: Receiver<QueryEvent>, config: SinkConfig) {
        let mut batch: Vec<QueryEvent> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(event)) => batch.push(event),
                    Ok(Err(_)) => {
                        if !batch.is_empty() {
                            Self::flush(&pool, &batch).await;
                        }
                        info!("Analytics sink shutting down (channel closed)");
                        return;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                Self::flush(&pool, &batch).await;
                batch.clear();
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    async fn flush(pool: &PgPool, batch: &[QueryEvent]) {
        debug!("Flushing {} query events", batch.len());

        let mut query_builder = sqlx::QueryBuilder::new(
            r#"
            INSERT INTO query_events (
                query_id, session_id, user_id, organization_id, question,
                answer_length, response_time_ms, source_chunk_ids,
                humanized, success, error_kind, created_at
            )
            "#,
        );

        query_builder.push_values(batch, |mut b, event| {
            b.push_bind(event.query_id)
                .push_bind(&event.session_id)
                .push_bind(&event.user_id)
                .push_bind(&event.organization_id)
                .push_bind(&event.question)
                .push_bind(event.answer_length as i32)
                .push_bind(event.response_time_ms as i64)
                .push_bind(sqlx::types::Json(&event.source_chunk_ids))
                .push_bind(event.humanized)
                .push_bind(event.success)
                .push_bind(&event.error_kind)
                .push_bind(event.created_at);
        });

        if let Err(e) = query_builder.build().execute(pool).await {
            error!("Failed to persist query event batch: {}", e);
        }
    }
}

impl AnalyticsSink for PgAnalyticsSink {
    fn emit(&self, event: QueryEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Analytics queue full, dropping event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Capturing sink used across the orchestrator tests.
    #[derive(Default, Clone)]
    pub struct CapturingSink {
        pub events: Arc<Mutex<Vec<QueryEvent>>>,
    }

    impl AnalyticsSink for CapturingSink {
        fn emit(&self, event: QueryEvent) {
            self.events.lock().push(event);
        }
    }

    #[test]
    fn noop_and_tracing_sinks_accept_events() {
        let event = QueryEvent {
            query_id: Uuid::new_v4(),
            session_id: "s".into(),
            user_id: "u".into(),
            organization_id: "orgA".into(),
            question: "q".into(),
            answer_length: 0,
            response_time_ms: 12,
            source_chunk_ids: vec![],
            humanized: true,
            success: true,
            error_kind: None,
            created_at: Utc::now(),
        };
        NoopSink.emit(event.clone());
        TracingSink.emit(event);
    }

    #[test]
    fn capturing_sink_records() {
        let sink = CapturingSink::default();
        sink.emit(QueryEvent {
            query_id: Uuid::new_v4(),
            session_id: "s".into(),
            user_id: "u".into(),
            organization_id: "orgA".into(),
            question: "q".into(),
            answer_length: 5,
            response_time_ms: 1,
            source_chunk_ids: vec!["a#0".into()],
            humanized: false,
            success: false,
            error_kind: Some("LLMUnavailable".into()),
            created_at: Utc::now(),
        });
        assert_eq!(sink.events.lock().len(), 1);
        assert_eq!(
            sink.events.lock()[0].error_kind.as_deref(),
            Some("LLMUnavailable")
        );
    }
}
