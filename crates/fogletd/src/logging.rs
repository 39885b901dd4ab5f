//! Line-delimited JSON log output.
//!
//! One JSON object per line:
//!
//! ```text
//! {"timestamp":"MM/dd/yyyy hh:mm:ss.SSS","logLevel":"INFO","threadName":"...","moduleName":"...","message":"...","exceptionMessage":"?","stacktrace":"?"}
//! ```
//!
//! Structured fields are taken directly from the event: the `message`
//! field becomes `message` (other fields are appended as `key=value`),
//! and `error` / `stacktrace` fields map to `exceptionMessage` /
//! `stacktrace`.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Event formatter producing the wire JSON schema.
pub struct WireFormatter;

#[derive(Default)]
struct FieldCollector {
    message: String,
    extras: Vec<(String, String)>,
    exception: Option<String>,
    stacktrace: Option<String>,
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        self.record_rendered(field.name(), rendered);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_rendered(field.name(), value.to_string());
    }
}

impl FieldCollector {
    fn record_rendered(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "error" | "exception" => self.exception = Some(value),
            "stacktrace" => self.stacktrace = Some(value),
            other => self.extras.push((other.to_string(), value)),
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

/// Render one log line from its parts.
fn render_line(
    timestamp: &str,
    level: &str,
    thread: &str,
    module: &str,
    collector: &FieldCollector,
) -> String {
    let mut message = collector.message.clone();
    for (key, value) in &collector.extras {
        if !message.is_empty() {
            message.push(' ');
        }
        message.push_str(key);
        message.push('=');
        message.push_str(value);
    }

    let mut line = serde_json::json!({
        "timestamp": timestamp,
        "logLevel": level,
        "threadName": thread,
        "moduleName": module,
        "message": message,
    });
    if let Some(exception) = &collector.exception {
        line["exceptionMessage"] = serde_json::Value::String(exception.clone());
    }
    if let Some(stacktrace) = &collector.stacktrace {
        line["stacktrace"] = serde_json::Value::String(stacktrace.clone());
    }
    line.to_string()
}

impl<S, N> FormatEvent<S, N> for WireFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let timestamp = chrono::Local::now()
            .format("%m/%d/%Y %I:%M:%S%.3f")
            .to_string();
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();

        let line = render_line(
            &timestamp,
            level_name(event.metadata().level()),
            &thread,
            event.metadata().target(),
            &collector,
        );
        writeln!(writer, "{line}")
    }
}

/// Install the global subscriber with the wire JSON formatter.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .event_format(WireFormatter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_carries_the_wire_fields() {
        let collector = FieldCollector {
            message: "container created".to_string(),
            extras: vec![("uuid".to_string(), "w1".to_string())],
            exception: None,
            stacktrace: None,
        };
        let line = render_line(
            "08/02/2026 10:15:42.123",
            "INFO",
            "tokio-runtime-worker",
            "foglet_lifecycle::engine",
            &collector,
        );
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["timestamp"], "08/02/2026 10:15:42.123");
        assert_eq!(value["logLevel"], "INFO");
        assert_eq!(value["threadName"], "tokio-runtime-worker");
        assert_eq!(value["moduleName"], "foglet_lifecycle::engine");
        assert_eq!(value["message"], "container created uuid=w1");
        assert!(value.get("exceptionMessage").is_none());
    }

    #[test]
    fn exception_fields_map_to_the_optional_keys() {
        let collector = FieldCollector {
            message: "pull failed".to_string(),
            extras: vec![],
            exception: Some("connection refused".to_string()),
            stacktrace: Some("at pull_image".to_string()),
        };
        let line = render_line("d", "WARN", "t", "m", &collector);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["exceptionMessage"], "connection refused");
        assert_eq!(value["stacktrace"], "at pull_image");
    }

    #[test]
    fn levels_use_wire_names() {
        assert_eq!(level_name(&Level::WARN), "WARN");
        assert_eq!(level_name(&Level::ERROR), "ERROR");
    }
}
