//! Log output and optional OTLP trace export.
//!
//! Spans always go to a human-readable `fmt` layer. When
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set they are also exported over OTLP/gRPC;
//! `OTEL_EXPORTER_OTLP_HEADERS` (`k=v,k2=v2`, `-bin` keys base64) becomes gRPC
//! metadata.

use anyhow::{Context, Result, anyhow};
use base64::{Engine, engine::general_purpose::STANDARD};
use once_cell::sync::OnceCell;
use opentelemetry::{
    KeyValue, global, propagation::TextMapCompositePropagator, trace::TracerProvider as _,
};
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
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};
use ulid::Ulid;

const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const HEADERS_ENV: &str = "OTEL_EXPORTER_OTLP_HEADERS";
const PROTOCOL_ENV: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
const INSTANCE_ENV: &str = "OTEL_SERVICE_INSTANCE_ID";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

static TRACER_PROVIDER: OnceCell<SdkTracerProvider> = OnceCell::new();

/// `k=v` pairs; entries without `=` are dropped.
fn header_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn metadata(pairs: &[(String, String)]) -> Result<MetadataMap> {
    let mut map = MetadataMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        if key.ends_with("-bin") {
            let bytes = STANDARD
                .decode(value.as_bytes())
                .map_err(|err| anyhow!("failed to base64-decode value for key {key}: {err}"))?;
            let name = MetadataKey::<Binary>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("invalid binary metadata key {key}: {err}"))?;
            map.insert_bin(name, MetadataValue::from_bytes(&bytes));
        } else {
            let name = MetadataKey::<Ascii>::from_bytes(key.as_bytes())
                .map_err(|err| anyhow!("invalid ASCII metadata key {key}: {err}"))?;
            let value: MetadataValue<Ascii> = value
                .parse()
                .map_err(|err| anyhow!("invalid ASCII metadata value for key {key}: {err}"))?;
            map.insert(name, value);
        }
    }
    Ok(map)
}

/// Scheme-less endpoints are assumed to be TLS.
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

/// Host to verify the collector certificate against, for `https` endpoints.
fn tls_domain(endpoint: &str) -> Option<&str> {
    endpoint
        .strip_prefix("https://")
        .and_then(|rest| rest.split('/').next())
        .and_then(|authority| authority.split(':').next())
        .filter(|host| !host.is_empty())
}

fn init_tracer(endpoint: &str) -> Result<Tracer> {
    if let Ok(protocol) = var(PROTOCOL_ENV) {
        if protocol != "grpc" {
            debug!("{PROTOCOL_ENV}='{protocol}' ignored: only 'grpc' is supported");
        }
    }

    let endpoint = normalize_endpoint(endpoint);
    let mut builder = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_compression(Compression::Gzip)
        .with_timeout(EXPORT_TIMEOUT);

    if let Some(domain) = tls_domain(&endpoint) {
        builder = builder.with_tls_config(
            ClientTlsConfig::new()
                .domain_name(domain.to_string())
                .with_native_roots(),
        );
    }

    let pairs = var(HEADERS_ENV)
        .map(|raw| header_pairs(&raw))
        .unwrap_or_default();
    if !pairs.is_empty() {
        builder = builder.with_metadata(metadata(&pairs)?);
    }

    let exporter = builder.build().context("Failed to build OTLP exporter")?;
    let instance_id = var(INSTANCE_ENV).unwrap_or_else(|_| Ulid::new().to_string());

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(
            Resource::builder_empty()
                .with_attributes([
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

/// Install the global subscriber. Without `-v` only errors are shown unless
/// `RUST_LOG` says otherwise.
///
/// # Errors
///
/// Returns an error if the exporter or subscriber cannot be initialized.
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .pretty();

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity_level.unwrap_or(Level::ERROR).into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("opentelemetry_sdk=warn".parse()?);

    match var(ENDPOINT_ENV) {
        Ok(endpoint) => {
            let otel_layer = tracing_opentelemetry::layer().with_tracer(init_tracer(&endpoint)?);
            let subscriber = Registry::default()
                .with(fmt_layer)
                .with(otel_layer)
                .with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        Err(_) => {
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

/// Flush pending spans. Does nothing when export was never enabled.
pub fn shutdown_tracer() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        debug!("shutting down tracer provider");
        if let Err(err) = provider.shutdown() {
            debug!("tracer provider shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_pairs_skip_malformed_entries() {
        let pairs = header_pairs("Authorization = Bearer abc ,malformed,x-tenant=shop");
        assert_eq!(
            pairs,
            vec![
                ("authorization".to_string(), "Bearer abc".to_string()),
                ("x-tenant".to_string(), "shop".to_string()),
            ]
        );
        assert!(header_pairs("").is_empty());
    }

    #[test]
    fn metadata_handles_ascii_and_binary_keys() -> Result<()> {
        let pairs = header_pairs("authorization=Bearer abc,trace-bin=YmluYXJ5IGRhdGE=");
        let map = metadata(&pairs)?;
        assert_eq!(map.len(), 2);
        Ok(())
    }

    #[test]
    fn metadata_rejects_bad_base64() {
        let pairs = vec![("trace-bin".to_string(), "not base64!!".to_string())];
        let result = metadata(&pairs);
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("failed to base64-decode"));
        }
    }

    #[test]
    fn endpoints_default_to_https() {
        assert_eq!(normalize_endpoint("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(normalize_endpoint("collector:4317/"), "https://collector:4317");
        assert_eq!(
            normalize_endpoint("https://otel.storegate.dev:4317/v1/traces"),
            "https://otel.storegate.dev:4317/v1/traces"
        );
    }

    #[test]
    fn tls_domain_only_for_https() {
        assert_eq!(
            tls_domain("https://otel.storegate.dev:4317/v1/traces"),
            Some("otel.storegate.dev")
        );
        assert_eq!(tls_domain("http://localhost:4317"), None);
    }

    #[test]
    fn shutdown_without_provider_is_a_noop() {
        shutdown_tracer();
    }
}
