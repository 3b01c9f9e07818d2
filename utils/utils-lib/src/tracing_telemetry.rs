/// OpenTelemetry KeyVal for Processor Tags
pub use opentelemetry::{global, KeyValue};

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::Tracer, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Parse KeyValues from the cmdline arguments.
pub fn parse_key_value(source: &str) -> Result<KeyValue, String> {
    match source.split_once('=') {
        None => Err("Each element must be in the format: 'Key=Value'".to_string()),
        Some((key, value)) => Ok(KeyValue::new(key.to_string(), value.to_string())),
    }
}

/// Get Default Processor Tags.
pub fn default_tracing_tags(git_commit: &str, cargo_version: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("git.commit", git_commit.to_string()),
        KeyValue::new("crate.version", cargo_version.to_string()),
    ]
}

/// Fmt Layer for console output.
pub enum FmtLayer {
    /// Output traces to stdout.
    Stdout,
    /// Output traces to stderr.
    Stderr,
    /// Don't output traces to console.
    None,
}

/// Tracing telemetry style.
#[derive(Debug, Clone, Copy, strum_macros::EnumString, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FmtStyle {
    /// Compact style.
    Compact,
    /// Pretty Style.
    Pretty,
    /// JSON Style.
    Json,
}

/// Tracing telemetry builder.
pub struct TracingTelemetry {
    writer: FmtLayer,
    style: FmtStyle,
    colours: bool,
    tracing_endpoint: Option<String>,
    tracing_tags: Vec<KeyValue>,
}

impl TracingTelemetry {
    /// Tracing telemetry default builder.
    pub fn builder() -> Self {
        Self {
            writer: FmtLayer::Stdout,
            style: FmtStyle::Pretty,
            colours: true,
            tracing_endpoint: None,
            tracing_tags: Vec::new(),
        }
    }
    /// Specify writer stream.
    pub fn with_writer(self, writer: FmtLayer) -> TracingTelemetry {
        TracingTelemetry { writer, ..self }
    }
    /// Specify style.
    pub fn with_style(self, style: FmtStyle) -> TracingTelemetry {
        TracingTelemetry { style, ..self }
    }
    /// Specify whether colour is needed or not.
    pub fn with_colours(self, colours: bool) -> TracingTelemetry {
        TracingTelemetry { colours, ..self }
    }

    /// Specify the OTLP collector endpoint, If any.
    pub fn with_tracing_endpoint(self, tracing_endpoint: Option<String>) -> TracingTelemetry {
        TracingTelemetry {
            tracing_endpoint,
            ..self
        }
    }

    /// Specify the tracing tags, If any.
    pub fn with_tracing_tags(self, tracing_tags: Vec<KeyValue>) -> TracingTelemetry {
        TracingTelemetry {
            tracing_tags,
            ..self
        }
    }

    fn tracer(endpoint: String, service_name: &str, tags: Vec<KeyValue>) -> Option<Tracer> {
        let mut tags = tags.into_iter().fold(Vec::<KeyValue>::new(), |mut acc, kv| {
            if !acc.iter().any(|acc| acc.key == kv.key) {
                acc.push(kv);
            }
            acc
        });
        tags.push(KeyValue::new("service.name", service_name.to_string()));
        global::set_text_map_propagator(TraceContextPropagator::new());

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                opentelemetry_sdk::trace::config().with_resource(Resource::new(tags)),
            )
            .install_batch(opentelemetry_sdk::runtime::TokioCurrentThread)
        {
            Ok(tracer) => Some(tracer),
            Err(error) => {
                eprintln!("Failed to initialise the trace exporter: {error}");
                None
            }
        }
    }

    /// Initialize the telemetry instance.
    pub fn init(self, service_name: &str) {
        let stdout = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(self.colours);
        let stderr = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(self.colours);

        let tags = self.tracing_tags;
        let telemetry = self
            .tracing_endpoint
            .and_then(|endpoint| Self::tracer(endpoint, service_name, tags))
            .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = Registry::default().with(filter).with(telemetry);

        match (self.writer, self.style) {
            (FmtLayer::Stderr, FmtStyle::Compact) => subscriber.with(stderr.compact()).init(),
            (FmtLayer::Stdout, FmtStyle::Compact) => subscriber.with(stdout.compact()).init(),
            (FmtLayer::Stderr, FmtStyle::Pretty) => subscriber.with(stderr.pretty()).init(),
            (FmtLayer::Stdout, FmtStyle::Pretty) => subscriber.with(stdout.pretty()).init(),
            (FmtLayer::Stderr, FmtStyle::Json) => subscriber.with(stderr.json()).init(),
            (FmtLayer::Stdout, FmtStyle::Json) => subscriber.with(stdout.json()).init(),
            (FmtLayer::None, _) => subscriber.init(),
        };
    }
}

/// Flushes and shuts down the global tracer provider.
pub fn flush_traces() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_values() {
        let kv = parse_key_value("cluster=alpha").unwrap();
        assert_eq!(kv.key.as_str(), "cluster");
        assert!(parse_key_value("cluster").is_err());
    }

    #[test]
    fn styles() {
        assert!(matches!("json".parse::<FmtStyle>(), Ok(FmtStyle::Json)));
        assert!(matches!("compact".parse::<FmtStyle>(), Ok(FmtStyle::Compact)));
        assert!("fancy".parse::<FmtStyle>().is_err());
    }
}
