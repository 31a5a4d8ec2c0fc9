//! Shared execution context handed to every stage.

use crate::config::ConfigurationManager;
use crate::events::{EventSink, NoOpEventSink};
use crate::framework::Framework;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a stage needs besides its own configuration record.
///
/// The context is read-only; stages communicate only through artifacts on
/// disk.
#[derive(Clone)]
pub struct StageContext {
    run_id: Uuid,
    configs: Arc<ConfigurationManager>,
    framework: Arc<dyn Framework>,
    event_sink: Arc<dyn EventSink>,
}

impl StageContext {
    /// Creates a context with a fresh run id and a no-op event sink.
    #[must_use]
    pub fn new(configs: Arc<ConfigurationManager>, framework: Arc<dyn Framework>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            configs,
            framework,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Overrides the run id.
    #[must_use]
    pub const fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// The id of the current run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The configuration store.
    #[must_use]
    pub fn configs(&self) -> &ConfigurationManager {
        &self.configs
    }

    /// The model framework.
    #[must_use]
    pub fn framework(&self) -> &dyn Framework {
        self.framework.as_ref()
    }

    /// Emits an event tagged with the run id.
    pub async fn emit_event(&self, event_type: &str, data: Option<Value>) {
        self.event_sink
            .emit(event_type, Some(self.tag(data)))
            .await;
    }

    /// Emits an event tagged with the run id, without awaiting.
    pub fn try_emit_event(&self, event_type: &str, data: Option<Value>) {
        self.event_sink.try_emit(event_type, Some(self.tag(data)));
    }

    fn tag(&self, data: Option<Value>) -> Value {
        let mut payload = match data {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        payload.insert("run_id".to_string(), Value::String(self.run_id.to_string()));
        Value::Object(payload)
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("run_id", &self.run_id)
            .field("framework", &self.framework.name())
            .finish_non_exhaustive()
    }
}
