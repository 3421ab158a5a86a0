//! Per-run context.

use crate::cancellation::CancellationToken;
use crate::domain::ParameterDomain;
use crate::events::{EventSink, NoOpEventSink};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Everything scoped to one pipeline run.
///
/// The context is an explicit value passed to the builder and scheduler;
/// nothing about a run lives in global state, so several runs can proceed
/// side by side.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    root: PathBuf,
    domain: Arc<ParameterDomain>,
    events: Arc<dyn EventSink>,
    cancellation: Arc<CancellationToken>,
    created_at: DateTime<Utc>,
}

impl RunContext {
    /// Creates a context with a fresh time-ordered run id, a no-op event
    /// sink and its own cancellation token.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, domain: ParameterDomain) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            root: root.into(),
            domain: Arc::new(domain),
            events: Arc::new(NoOpEventSink),
            cancellation: Arc::new(CancellationToken::new()),
            created_at: Utc::now(),
        }
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Shares a cancellation token with the caller.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Arc<CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The data root artifact paths are relative to.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The frozen parameter domain.
    #[must_use]
    pub fn domain(&self) -> &ParameterDomain {
        &self.domain
    }

    /// The event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// The cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// When the context was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Emits an event, adding the run id to object payloads.
    pub fn emit(&self, event_type: &str, data: serde_json::Value) {
        let data = match data {
            serde_json::Value::Object(mut map) => {
                map.insert(
                    "run_id".to_string(),
                    serde_json::Value::String(self.run_id.to_string()),
                );
                serde_json::Value::Object(map)
            }
            other => other,
        };
        self.events.try_emit(event_type, Some(data));
    }
}
