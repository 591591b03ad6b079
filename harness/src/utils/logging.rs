use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::{format::Writer, FormatEvent, FormatFields};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const DEFAULT_DIRECTIVES: &str = "cdk_harness=info,harness_ledger=info,harness_accounts=info";
// Shown in their own columns by the pretty formatter.
const COLUMN_FIELDS: &[&str] = &["stage", "run_id"];

#[derive(Debug, Clone, Default)]
pub struct SpanFields {
    pub display: String,
    pub raw: HashMap<String, String>,
}

impl SpanFields {
    fn add(&mut self, name: &str, value: String) {
        if !COLUMN_FIELDS.contains(&name) {
            if !self.display.is_empty() {
                self.display.push_str(", ");
            }
            self.display.push_str(&format!("{name}={value}"));
        }
        self.raw.insert(name.to_string(), value);
    }
}

#[derive(Default)]
struct SpanFieldVisitor {
    fields: SpanFields,
}

impl Visit for SpanFieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields.add(field.name(), format!("{value:?}").trim_matches('"').to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.add(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.add(field.name(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.add(field.name(), value.to_string());
    }
}

/// Keeps span fields around so the formatters can place them in columns.
pub struct SpanFieldLayer;

impl<S> Layer<S> for SpanFieldLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &tracing::span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = SpanFieldVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(visitor.fields);
    }

    fn on_record(&self, id: &tracing::span::Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        let existing = extensions.remove::<SpanFields>().unwrap_or_default();
        let mut visitor = SpanFieldVisitor { fields: existing };
        values.record(&mut visitor);
        extensions.insert(visitor.fields);
    }
}

fn span_field<S, N>(ctx: &FmtContext<'_, S, N>, name: &str) -> Option<String>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let span = ctx.lookup_current()?;
    span.scope().find_map(|span| span.extensions().get::<SpanFields>().and_then(|fields| fields.raw.get(name).cloned()))
}

// Pretty formatter is formatted for console readability
pub struct PrettyFormatter;

impl<S, N> FormatEvent<S, N> for PrettyFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let meta = event.metadata();
        let now = Utc::now().format("%y-%m-%d %H:%M:%S").to_string();

        let ts_color = "\x1b[96m";
        let level_color = match *meta.level() {
            Level::TRACE => "\x1b[90m",
            Level::DEBUG => "\x1b[34m",
            Level::INFO => "\x1b[32m",
            Level::WARN => "\x1b[33m",
            Level::ERROR => "\x1b[31m",
        };
        let msg_color = "\x1b[97m";
        let column_color = "\x1b[92m";
        let dim_color = "\x1b[90m";
        let reset = "\x1b[0m";

        let stage = span_field(ctx, "stage").map(|label| stage_column(&label)).unwrap_or_else(|| "-".to_string());
        let run = span_field(ctx, "run_id").map(|id| id.chars().take(8).collect()).unwrap_or_else(|| "-".to_string());

        let mut visitor = FieldExtractor::default();
        event.record(&mut visitor);

        // Timestamp | Level | Stage | Run | Service | Message (fields)
        write!(writer, "{ts_color}{now}{reset} ")?;
        write!(writer, "{dim_color}|{reset} ")?;
        write!(writer, "{level_color}{:<5}{reset} ", *meta.level())?;
        write!(writer, "{dim_color}|{reset} ")?;
        write!(writer, "{column_color}{stage:<8}{reset} ")?;
        write!(writer, "{dim_color}|{reset} ")?;
        write!(writer, "{column_color}{run:<8}{reset} ")?;
        write!(writer, "{dim_color}|{reset} ")?;
        write!(writer, "{column_color}{:<8}{reset} ", extract_service_name(meta.target()))?;
        write!(writer, "{dim_color}|{reset} ")?;
        write!(writer, "{msg_color}{}{reset}", visitor.message)?;

        if !visitor.fields.is_empty() {
            write!(writer, " ({msg_color}{}{reset})", visitor.fields)?;
        }

        writeln!(writer)
    }
}

#[derive(Default)]
struct FieldExtractor {
    message: String,
    fields: String,
}

impl Visit for FieldExtractor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let field_color = "\x1b[90m";
        let reset = "\x1b[0m";

        let value = format!("{value:?}").trim_matches('"').to_string();
        if field.name() == "message" {
            self.message = value;
        } else {
            if !self.fields.is_empty() {
                self.fields.push_str(", ");
            }
            self.fields.push_str(&format!("{field_color}{}={value}{reset}", field.name()));
        }
    }
}

// JSON formatter, one object per line
pub struct JsonEventFormatter;

#[derive(Default)]
struct JsonFieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl Visit for JsonFieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value = format!("{value:?}").trim_matches('"').to_string();
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonEventFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let meta = event.metadata();

        let mut visitor = JsonFieldVisitor::default();
        event.record(&mut visitor);

        let mut root = Map::new();
        let timestamp = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        root.insert("timestamp".to_string(), Value::String(timestamp));
        root.insert("level".to_string(), Value::String(meta.level().to_string()));
        root.insert("target".to_string(), Value::String(meta.target().to_string()));
        root.insert("service".to_string(), Value::String(extract_service_name(meta.target()).to_string()));
        if let Some(file) = meta.file() {
            root.insert("filename".to_string(), Value::String(file.to_string()));
        }
        if let Some(line) = meta.line() {
            root.insert("line_number".to_string(), Value::from(line));
        }
        if let Some(message) = visitor.message.take() {
            root.insert("message".to_string(), Value::String(message));
        }

        let mut fields = visitor.fields;
        if let Some(span) = ctx.lookup_current() {
            fields.insert("span_name".to_string(), Value::String(span.metadata().name().to_string()));
            for span in span.scope() {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &span_fields.raw {
                        fields.entry(key.clone()).or_insert_with(|| Value::String(value.clone()));
                    }
                }
            }
        }
        if !fields.is_empty() {
            root.insert("fields".to_string(), Value::Object(fields));
        }

        let line = serde_json::to_string(&Value::Object(root)).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` selects what is logged, `LOG_FORMAT=json` switches from the columnar
/// console output to one JSON object per line.
pub fn init_logging() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::builder().with_default_directive(Level::INFO.into()).parse_lossy(DEFAULT_DIRECTIVES)
        });

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let registry = Registry::default().with(env_filter).with(SpanFieldLayer).with(ErrorLayer::default());

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);
    if log_format == "json" {
        tracing::subscriber::set_global_default(registry.with(fmt_layer.event_format(JsonEventFormatter)))?;
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt_layer.event_format(PrettyFormatter)))?;
    }
    Ok(())
}

/// Short column name for a stage label, e.g. `STAGE 2` for
/// `Stage 2: Contract Deployment (Ballot)`.
fn stage_column(label: &str) -> String {
    label.split_once(':').map_or(label, |(prefix, _)| prefix).trim().to_uppercase()
}

/// Maps crate names to short display names for the service column
fn extract_service_name(target: &str) -> &'static str {
    if target.starts_with("harness_ledger") {
        "LEDGER"
    } else if target.starts_with("harness_accounts") {
        "ACCOUNTS"
    } else if target.starts_with("cdk_harness") {
        "-"
    } else if target.starts_with("alloy") {
        "ALLOY"
    } else {
        "EXTERNAL"
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Stage 1: Raw Precompile Invocation (sha256)", "STAGE 1")]
    #[case("Stage 3: Contract Invocation and Tests (Ballot) - CRASH", "STAGE 3")]
    #[case("setup", "SETUP")]
    fn stage_column_is_the_label_prefix(#[case] label: &str, #[case] expected: &str) {
        assert_eq!(stage_column(label), expected);
    }

    #[rstest]
    #[case("harness_ledger::ledger", "LEDGER")]
    #[case("cdk_harness::core::executor", "-")]
    #[case("alloy_transport_http", "ALLOY")]
    #[case("hyper::client", "EXTERNAL")]
    fn service_names(#[case] target: &str, #[case] expected: &str) {
        assert_eq!(extract_service_name(target), expected);
    }
}
