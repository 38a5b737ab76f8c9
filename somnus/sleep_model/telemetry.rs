use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::runtime::{Builder, Handle, Runtime};

/// Builder for model pipeline telemetry.
pub struct ModelTelemetryBuilder {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl ModelTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            sink: None,
            log_path: None,
            event_publisher: None,
        }
    }

    /// Writes logs to a JSON-lines file (ignored when a sink is set).
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Writes logs to an existing sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<ModelTelemetry> {
        let sink = match (self.sink, self.log_path) {
            (Some(sink), _) => Some(sink),
            (None, Some(path)) => Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn LogSink>),
            (None, None) => None,
        };
        let event = self.event_publisher.map(EventHandle::new).transpose()?;
        Ok(ModelTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                event,
            }),
        })
    }
}

/// Telemetry handle shared by the training pipeline and inference service.
#[derive(Clone)]
pub struct ModelTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for ModelTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.sink.is_some())
            .field("events", &self.inner.event.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Option<Runtime>,
    publisher: Arc<dyn EventPublisher>,
}

fn blocking_runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}

impl EventHandle {
    /// Inside a tokio context events are spawned, so no runtime is built.
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        let runtime = if Handle::try_current().is_ok() {
            None
        } else {
            Some(blocking_runtime()?)
        };
        Ok(Self { runtime, publisher })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("model telemetry event publish failed: {err:?}");
                }
            });
            return Ok(());
        }
        match &self.runtime {
            Some(runtime) => runtime.block_on(self.publisher.publish(record)),
            None => blocking_runtime()?.block_on(self.publisher.publish(record)),
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        // A blocking shutdown panics when the last handle is dropped on an async worker.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl ModelTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> ModelTelemetryBuilder {
        ModelTelemetryBuilder::new(module)
    }

    /// Logs a message with structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(sink) = &self.inner.sink {
            sink.log(&LogRecord::new(&self.inner.module, level, message).with_metadata(metadata))?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(&self.inner.module, event_type, payload))?;
        }
        Ok(())
    }
}

/// Best-effort log through optional telemetry.
pub(crate) fn log(telemetry: Option<&ModelTelemetry>, level: LogLevel, message: &str, metadata: Value) {
    if let Some(telemetry) = telemetry {
        let _ = telemetry.log(level, message, metadata);
    }
}

/// Best-effort event through optional telemetry.
pub(crate) fn event(telemetry: Option<&ModelTelemetry>, event_type: &str, payload: Value) {
    if let Some(telemetry) = telemetry {
        let _ = telemetry.event(event_type, payload);
    }
}
