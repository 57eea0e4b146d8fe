use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};

/// Emitted when a module or pipeline starts fitting.
pub const TRAINING_STARTED: &str = "training.started";
/// Per-iteration progress of iterative modules.
pub const TRAINING_RESULT: &str = "training.result";
/// Emitted after a successful fit.
pub const TRAINING_COMPLETED: &str = "training.completed";
/// Emitted when a fit fails.
pub const TRAINING_FAILED: &str = "training.failed";
/// One scored sample during a pipeline test.
pub const TEST_INSTANCE: &str = "test.instance";
/// Validation score of a pipeline hold-out set.
pub const PIPELINE_VALIDATION: &str = "pipeline.validation";

/// Builder for recognition telemetry sinks.
pub struct TelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    log_sink: Option<Arc<dyn LogSink>>,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl TelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            log_sink: None,
            publishers: Vec::new(),
        }
    }

    /// Writes JSON-lines logs to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops file log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sends logs to an already constructed sink instead of a file.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Adds an event publisher; may be called repeatedly.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<Telemetry> {
        let logger: Option<Arc<dyn LogSink>> = match (self.log_sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::with_min_level(path, self.min_level)?)),
            (None, None) => None,
        };
        Ok(Telemetry {
            inner: Some(Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publishers: self.publishers,
            })),
        })
    }
}

/// Telemetry handle carried by every module.
///
/// The default handle is detached: [`Telemetry::log`] and
/// [`Telemetry::event`] succeed without doing anything.
#[derive(Clone, Default)]
pub struct Telemetry {
    inner: Option<Arc<TelemetryInner>>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("module", &self.module())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<Arc<dyn LogSink>>,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl Telemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> TelemetryBuilder {
        TelemetryBuilder::new(module)
    }

    /// A handle with no sinks.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// True when at least one sink is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.logger.is_some() || !inner.publishers.is_empty())
    }

    /// Module name stamped on records, if attached.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.inner.as_deref().map(|inner| inner.module.as_str())
    }

    /// Same sinks, records stamped with another module name.
    #[must_use]
    pub fn scoped(&self, module: impl Into<String>) -> Self {
        Self {
            inner: self.inner.as_ref().map(|inner| {
                Arc::new(TelemetryInner {
                    module: module.into(),
                    logger: inner.logger.clone(),
                    publishers: inner.publishers.clone(),
                })
            }),
        }
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(inner) = &self.inner {
            if let Some(logger) = &inner.logger {
                let record = LogRecord::new(&inner.module, level, message).with_metadata(metadata);
                logger.write(&record)?;
            }
        }
        Ok(())
    }

    /// Emits an event to every attached publisher.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(inner) = &self.inner {
            for publisher in &inner.publishers {
                publisher.publish(EventRecord::new(&inner.module, event_type, payload.clone()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::{ListenerRegistry, MemoryEventBus};
    use shared_logging::MemoryLogger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("recognition.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = Telemetry::builder("pipeline")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "training.start", json!({ "samples": 3 }))
            .unwrap();
        telemetry
            .event(TRAINING_COMPLETED, json!({ "trained": true }))
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("training.start"));
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn detached_handle_is_silent() {
        let telemetry = Telemetry::detached();
        assert!(!telemetry.is_attached());
        telemetry.log(LogLevel::Error, "ignored", Value::Null).unwrap();
        telemetry.event(TRAINING_FAILED, Value::Null).unwrap();
        assert!(!telemetry.scoped("KNN").is_attached());
    }

    #[test]
    fn scoped_handles_share_sinks() {
        let logs = Arc::new(MemoryLogger::new(8));
        let listeners = Arc::new(ListenerRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        listeners.subscribe(TRAINING_STARTED, move |event| {
            assert_eq!(event.source, "MinDist");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let telemetry = Telemetry::builder("BAG")
            .log_sink(logs.clone())
            .event_publisher(listeners)
            .build()
            .unwrap();
        let member = telemetry.scoped("MinDist");
        member.log(LogLevel::Debug, "fit", json!({})).unwrap();
        member.event(TRAINING_STARTED, json!({})).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(logs.records()[0].module, "MinDist");
    }
}
