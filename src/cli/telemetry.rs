//! Log output and optional OTLP span export.
//!
//! Spans are exported over gRPC only when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//! set; otherwise the gateway only writes logs to stdout.

use anyhow::{Context, Result, anyhow};
use base64ct::{Base64, Encoding};
use once_cell::sync::OnceCell;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::{
    Resource,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{SdkTracerProvider, Tracer},
};
use std::{env::var, time::Duration};
use tonic::{
    metadata::{Ascii, Binary, MetadataKey, MetadataMap, MetadataValue},
    transport::ClientTlsConfig,
};
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

pub const ENV_LOG_FORMAT: &str = "AUTHGATE_LOG_FORMAT";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        match var(ENV_LOG_FORMAT) {
            Ok(value) if value.trim().eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Split `OTEL_EXPORTER_OTLP_HEADERS` (`k1=v1,k2=v2`) into pairs, dropping
/// entries without a value.
fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

/// Keys ending in `-bin` carry base64 values and become binary metadata.
fn metadata(headers: &[(String, String)]) -> Result<MetadataMap> {
    let mut map = MetadataMap::with_capacity(headers.len());

    for (key, value) in headers {
        if key.ends_with("-bin") {
            let bytes = Base64::decode_vec(value)
                .map_err(|e| anyhow!("invalid base64 value for metadata key {key}: {e}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid binary metadata key {key}: {e}"))?;
            map.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|e| anyhow!("invalid metadata key {key}: {e}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|e| anyhow!("invalid metadata value for key {key}: {e}"))?;
            map.insert(name, value);
        }
    }

    Ok(map)
}

/// gRPC endpoints without a scheme default to https.
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    }
}

/// Host part of an https endpoint, used as the TLS server name.
fn tls_domain(endpoint: &str) -> Option<&str> {
    let authority = endpoint.strip_prefix("https://")?.split('/').next()?;
    let host = if authority.starts_with('[') {
        authority.split(']').next()?.trim_start_matches('[')
    } else {
        authority.split(':').next()?
    };
    if host.is_empty() { None } else { Some(host) }
}

fn init_tracer() -> Result<Tracer> {
    match var("OTEL_EXPORTER_OTLP_PROTOCOL") {
        Ok(protocol) if protocol != "grpc" => {
            debug!(protocol = %protocol, "only grpc OTLP export is supported, ignoring protocol");
        }
        _ => {}
    }

    let endpoint = normalize_endpoint(
        &var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string()),
    );

    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(Duration::from_secs(3));

    if let Some(domain) = tls_domain(&endpoint) {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }

    if let Ok(raw) = var("OTEL_EXPORTER_OTLP_HEADERS") {
        let headers = parse_headers(&raw);
        if !headers.is_empty() {
            builder = builder.with_metadata(metadata(&headers)?);
        }
    }

    let exporter = builder.build().context("failed to build OTLP span exporter")?;

    let instance_id = var("OTEL_SERVICE_INSTANCE_ID").unwrap_or_else(|_| Ulid::new().to_string());

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes(vec![
                    KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    KeyValue::new("service.instance.id", instance_id),
                ])
                .build(),
        )
        .build();

    let _ = TRACER_PROVIDER.set(provider.clone());

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    Ok(provider.tracer(env!("CARGO_PKG_NAME")))
}

fn filter(level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("hyper_util=error".parse()?)
        .add_directive("h2=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the verbosity level. `AUTHGATE_LOG_FORMAT=json`
/// switches stdout to one JSON object per event.
///
/// # Errors
///
/// Returns an error if the exporter or the subscriber cannot be installed.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let level = verbosity_level.unwrap_or(Level::ERROR);

    let fmt_layer = match LogFormat::from_env() {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_target(false)
            .pretty()
            .boxed(),
    };

    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = init_tracer()?;
        let subscriber = Registry::default()
            .with(fmt_layer)
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(filter(level)?);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(fmt_layer).with(filter(level)?);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Flush and stop the span exporter, if one was installed.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("flushing spans");
        if let Err(err) = provider.shutdown() {
            debug!(error = %err, "tracer provider shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_split_and_trimmed() {
        let headers = parse_headers("Authorization = Bearer abc , x-tenant=acme");
        assert_eq!(
            headers,
            vec![
                ("authorization".to_string(), "Bearer abc".to_string()),
                ("x-tenant".to_string(), "acme".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_headers_are_dropped() {
        assert!(parse_headers("").is_empty());
        let headers = parse_headers("a=1,broken,=nokey,b=2");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "a");
        assert_eq!(headers[1].0, "b");
    }

    #[test]
    fn values_may_contain_equals() {
        let headers = parse_headers("x-token=abc==");
        assert_eq!(headers[0].1, "abc==");
    }

    #[test]
    fn metadata_mixes_ascii_and_binary() {
        let headers = parse_headers("authorization=Bearer abc,trace-bin=YmluYXJ5IGRhdGE=");
        let map = metadata(&headers);
        assert!(map.is_ok());
        if let Ok(map) = map {
            assert_eq!(map.len(), 2);
            assert!(map.get("authorization").is_some());
            assert!(map.get_bin("trace-bin").is_some());
        }
    }

    #[test]
    fn invalid_binary_value_is_an_error() {
        let headers = vec![("trace-bin".to_string(), "not base64!!".to_string())];
        let result = metadata(&headers);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("invalid base64 value"));
        }
    }

    #[test]
    fn endpoints_default_to_https() {
        assert_eq!(normalize_endpoint("http://collector:4317"), "http://collector:4317");
        assert_eq!(normalize_endpoint("collector:4317/"), "https://collector:4317");
        assert_eq!(
            normalize_endpoint("https://otel.example.com/v1/traces"),
            "https://otel.example.com/v1/traces"
        );
    }

    #[test]
    fn tls_domain_only_for_https() {
        assert_eq!(tls_domain("https://otel.example.com:4317"), Some("otel.example.com"));
        assert_eq!(tls_domain("https://[::1]:4317"), Some("::1"));
        assert_eq!(tls_domain("http://collector:4317"), None);
    }

    #[test]
    fn log_format_from_env() {
        temp_env::with_var(ENV_LOG_FORMAT, Some("JSON"), || {
            assert_eq!(LogFormat::from_env(), LogFormat::Json);
        });
        temp_env::with_var(ENV_LOG_FORMAT, None::<&str>, || {
            assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
        });
    }

    #[test]
    fn shutdown_without_provider_is_a_noop() {
        shutdown_tracer();
    }
}
