//! Claim-check publisher service
//!
//! - `publish <topic> <file>`: store a file and publish its descriptor
//! - `resolve <descriptor.json> <output>`: fetch the payload a descriptor points at
//! - `consume [topic...]`: resolve descriptors as they arrive on Kafka

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use claimcheck_publisher::{
    ClaimHandler, Config, ConsumerError, Descriptor, DescriptorConsumer, KafkaChannel,
    PayloadResolver, PublishOptions, PublishRequest, Publisher, S3Connector, SignatureClassifier,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logs each resolved payload
struct LoggingHandler;

#[async_trait]
impl ClaimHandler for LoggingHandler {
    async fn handle(&self, descriptor: Descriptor, payload: Bytes) -> Result<(), ConsumerError> {
        info!(
            topic = %descriptor.topic,
            data_type = %descriptor.data_type,
            locator = %descriptor.locator,
            timestamp = %descriptor.timestamp,
            size_bytes = payload.len(),
            "Resolved claim-check payload"
        );
        Ok(())
    }
}

fn resolver_for(config: &Config) -> PayloadResolver {
    let endpoint = config.storage.endpoint();
    PayloadResolver::new(
        Arc::new(S3Connector::new(config.storage.force_path_style)),
        endpoint.credentials,
    )
    .with_ssl(endpoint.use_ssl)
    .with_region(endpoint.region)
    .with_video_root(&config.filesystem.video_dir)
}

/// Store a file and publish its descriptor
async fn run_publish(config: &Config, topic: &str, path: &str) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read payload file {}", path))?;

    let channel = Arc::new(
        KafkaChannel::new(config.kafka.clone()).context("Failed to initialize Kafka channel")?,
    );
    let publisher = Publisher::new(
        Arc::new(SignatureClassifier::new()),
        Arc::new(S3Connector::new(config.storage.force_path_style)),
    );

    let request = PublishRequest::new(topic, data, config.storage.endpoint(), channel)
        .with_video_dir(config.filesystem.video_dir.clone())
        .with_qos(config.publish.qos)
        .with_retained(config.publish.retained);

    let token = CancellationToken::new();
    let mut options = PublishOptions::new().with_cancellation(token.clone());
    if let Some(timeout) = config.publish_timeout() {
        options = options.with_timeout(timeout);
    }

    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    let outcome = publisher
        .publish(&request, &options)
        .await
        .context("Publish failed")?;

    info!(
        topic = %outcome.ack.topic,
        partition = ?outcome.ack.partition,
        offset = ?outcome.ack.offset,
        "Descriptor acknowledged"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.descriptor)?);

    Ok(())
}

/// Fetch the payload referenced by a descriptor file
async fn run_resolve(config: &Config, descriptor_path: &str, output: &str) -> Result<()> {
    let raw = tokio::fs::read(descriptor_path)
        .await
        .with_context(|| format!("Failed to read descriptor {}", descriptor_path))?;
    let descriptor: Descriptor =
        serde_json::from_slice(&raw).context("Failed to parse descriptor")?;

    let payload = resolver_for(config)
        .fetch(&descriptor)
        .await
        .context("Failed to resolve payload")?;

    tokio::fs::write(output, &payload)
        .await
        .with_context(|| format!("Failed to write payload to {}", output))?;

    info!(output = %output, size_bytes = payload.len(), "Payload resolved");
    Ok(())
}

/// Resolve descriptors from Kafka until interrupted
async fn run_consume(config: &Config, topics: &[String]) -> Result<()> {
    init_metrics(config.service.metrics_port)?;

    let consumer = Arc::new(
        DescriptorConsumer::new(config.kafka.clone(), Arc::new(resolver_for(config)))
            .context("Failed to initialize descriptor consumer")?,
    );

    if topics.is_empty() {
        consumer.subscribe_configured()?;
    } else {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;
    }

    let shutdown_handle = consumer.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_handle.shutdown();
    });

    consumer.run(Arc::new(LoggingHandler)).await?;

    info!("Consumer stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting claim-check publisher"
    );

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("help");

    match mode {
        "publish" => match (args.get(2), args.get(3)) {
            (Some(topic), Some(path)) => run_publish(&config, topic, path).await?,
            _ => bail!("Usage: claimcheck-publisher publish <topic> <file>"),
        },
        "resolve" => match (args.get(2), args.get(3)) {
            (Some(descriptor), Some(output)) => run_resolve(&config, descriptor, output).await?,
            _ => bail!("Usage: claimcheck-publisher resolve <descriptor.json> <output>"),
        },
        "consume" => run_consume(&config, &args[2..]).await?,
        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: claimcheck-publisher [publish|resolve|consume]");
    println!();
    println!("Modes:");
    println!("  publish <topic> <file>             - Store a file and publish its descriptor");
    println!("  resolve <descriptor.json> <output> - Fetch the payload a descriptor points at");
    println!("  consume [topic...]                 - Resolve descriptors as they arrive");
    println!();
    println!("Environment variables:");
    println!("  PUBLISHER__KAFKA__BOOTSTRAP_SERVERS - Kafka brokers (default: localhost:9092)");
    println!("  PUBLISHER__STORAGE__ADDRESS         - Object store host (default: localhost)");
    println!("  PUBLISHER__STORAGE__PORT            - Object store port (default: 9000)");
    println!("  PUBLISHER__STORAGE__ACCESS_KEY_ID   - Access key; empty uses ambient credentials");
    println!("  PUBLISHER__STORAGE__SECRET_ACCESS_KEY");
    println!("  PUBLISHER__FILESYSTEM__VIDEO_DIR    - Directory for video payloads");
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcheck_publisher::PayloadKind;

    #[tokio::test]
    async fn test_logging_handler_accepts_payload() {
        let descriptor = Descriptor::build(
            "sensors",
            "minio.local",
            "9000",
            PayloadKind::TinyData,
            "obj-1",
            chrono::Utc::now(),
        );

        let result = LoggingHandler
            .handle(descriptor, Bytes::from_static(b"21.5C"))
            .await;
        assert!(result.is_ok());
    }
}
