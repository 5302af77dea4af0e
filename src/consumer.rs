//! Message lifecycle coordinator for the ingestion queue.
//!
//! Owns the broker subscription and turns each delivery into exactly one
//! control decision: acknowledge, retry via republish, or permanent drop.
//! The decision logic lives in pure functions ([`classify`],
//! [`retry_payload`]) so the state machine is testable without a broker;
//! the lapin loop around them is thin wiring.
//!
//! Deliveries are strictly sequential: the channel prefetch is one, so a
//! message is fully processed before the next arrives. Throughput scales by
//! running more consumer processes against the same queue, not by in-process
//! concurrency.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::Config;
use crate::processing::{DocumentMetadata, IngestApi};

/// A message may be attempted this many times before it is dropped.
const MAX_RETRIES: u32 = 3;
/// Broker connection attempts before startup gives up.
const CONNECT_ATTEMPTS: u32 = 5;
/// Pause between broker connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors raised while operating the broker subscription.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The broker stayed unreachable through every startup attempt.
    #[error("Broker connection failed after {attempts} attempts: {source}")]
    Connect {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: lapin::Error,
    },
    /// Channel setup or consumption failed.
    #[error("Broker channel error: {0}")]
    Broker(#[from] lapin::Error),
}

/// Inbound job descriptor as carried on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobMessage {
    job_id: Option<String>,
    file_path: Option<String>,
    #[serde(default)]
    retries: u32,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Validated job ready for dispatch to the pipeline.
#[derive(Debug, PartialEq)]
pub(crate) struct JobDescriptor {
    pub(crate) job_id: String,
    pub(crate) path: PathBuf,
    pub(crate) retries: u32,
    pub(crate) metadata: DocumentMetadata,
}

/// Why a message was dropped without processing.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DropReason {
    /// Payload was not a decodable job message.
    Malformed,
    /// Payload decoded but lacked a job id, file path, or usable file name.
    MissingFields,
    /// Retry budget already spent.
    RetriesExhausted(u32),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "payload is not a valid job message"),
            Self::MissingFields => write!(f, "missing jobId or filePath"),
            Self::RetriesExhausted(retries) => {
                write!(f, "retry budget exhausted ({retries}/{MAX_RETRIES})")
            }
        }
    }
}

/// Per-message control decision.
#[derive(Debug, PartialEq)]
pub(crate) enum Disposition {
    /// Dispatch the job to the pipeline.
    Process(JobDescriptor),
    /// Reject without requeue; no replacement is published.
    Drop(DropReason),
}

/// Decide what to do with one delivery.
///
/// Only the payload's base file name is honored; any directory components a
/// producer smuggled into `filePath` are discarded before resolving against
/// the uploads root.
pub(crate) fn classify(body: &[u8], uploads_dir: &Path) -> Disposition {
    let message: JobMessage = match serde_json::from_slice(body) {
        Ok(message) => message,
        Err(_) => return Disposition::Drop(DropReason::Malformed),
    };

    let job_id = match message.job_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => id,
        None => return Disposition::Drop(DropReason::MissingFields),
    };
    let file_path = match message.file_path.filter(|path| !path.trim().is_empty()) {
        Some(path) => path,
        None => return Disposition::Drop(DropReason::MissingFields),
    };

    if message.retries >= MAX_RETRIES {
        return Disposition::Drop(DropReason::RetriesExhausted(message.retries));
    }

    let file_name = match Path::new(&file_path).file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_string(),
        None => return Disposition::Drop(DropReason::MissingFields),
    };

    let mut metadata = DocumentMetadata::from_map(message.metadata);
    if metadata.filename.is_none() {
        metadata.filename = Some(file_name.clone());
    }
    metadata.job_id = Some(job_id.clone());
    metadata.insert_extra("original_filename", Value::String(file_name.clone()));

    Disposition::Process(JobDescriptor {
        job_id,
        path: uploads_dir.join(file_name),
        retries: message.retries,
        metadata,
    })
}

/// Rebuild the payload with `retries` incremented, every other field intact.
///
/// Returns `None` when the body is not a JSON object (such a message never
/// reaches the retry path, since [`classify`] drops it first).
pub(crate) fn retry_payload(body: &[u8]) -> Option<Vec<u8>> {
    let mut value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object_mut()?;
    let retries = object
        .get("retries")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    object.insert("retries".to_string(), Value::from(retries + 1));
    serde_json::to_vec(&value).ok()
}

/// Broker subscription driving the ingestion pipeline one message at a time.
pub struct QueueConsumer {
    amqp_url: String,
    queue_name: String,
    uploads_dir: PathBuf,
    pipeline: Arc<dyn IngestApi>,
}

impl QueueConsumer {
    /// Build the consumer over the shared ingestion pipeline.
    pub fn new(config: &Config, pipeline: Arc<dyn IngestApi>) -> Self {
        Self {
            amqp_url: config.amqp_url.clone(),
            queue_name: config.queue_name.clone(),
            uploads_dir: config.uploads_dir.clone(),
            pipeline,
        }
    }

    /// Connect, declare the durable queue, and consume until the stream ends.
    pub async fn run(&self) -> Result<(), ConsumerError> {
        let connection = self.connect_with_retry().await?;
        let channel = connection.create_channel().await?;
        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        // One unacknowledged message at a time.
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue_name,
                "docflow-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue = %self.queue_name, "Consumer ready; waiting for messages");
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => self.handle_delivery(&channel, delivery).await,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to receive delivery");
                }
            }
        }

        tracing::info!("Consumer stream ended");
        Ok(())
    }

    async fn connect_with_retry(&self) -> Result<Connection, ConsumerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::info!(attempt, max = CONNECT_ATTEMPTS, "Connecting to broker");
            match Connection::connect(&self.amqp_url, ConnectionProperties::default()).await {
                Ok(connection) => {
                    tracing::info!("Connected to broker");
                    return Ok(connection);
                }
                Err(err) if attempt < CONNECT_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "Broker connection failed; retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(ConsumerError::Connect {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) {
        let job = match classify(&delivery.data, &self.uploads_dir) {
            Disposition::Process(job) => job,
            Disposition::Drop(reason) => {
                tracing::warn!(%reason, "Dropping message without requeue");
                reject(&delivery).await;
                return;
            }
        };

        tracing::info!(
            job_id = %job.job_id,
            path = %job.path.display(),
            retries = job.retries,
            "Dispatching job"
        );
        match self
            .pipeline
            .process(&job.job_id, &job.path, job.metadata)
            .await
        {
            Ok(result) => {
                tracing::info!(
                    job_id = %job.job_id,
                    title = result.title.as_deref().unwrap_or(""),
                    chunks = result.chunk_count,
                    "Job completed"
                );
                if let Err(err) = delivery.acker.ack(BasicAckOptions::default()).await {
                    tracing::error!(job_id = %job.job_id, error = %err, "Failed to ack message");
                }
            }
            Err(err) => {
                tracing::error!(job_id = %job.job_id, error = %err, "Job failed");
                // Retry via republish: the updated copy goes to the queue
                // tail as a new message, then the original is rejected.
                self.republish_with_retry(channel, &delivery.data, &job.job_id)
                    .await;
                reject(&delivery).await;
            }
        }
    }

    async fn republish_with_retry(&self, channel: &Channel, body: &[u8], job_id: &str) {
        let Some(payload) = retry_payload(body) else {
            tracing::error!(job_id, "Could not build retry payload; job is dropped");
            return;
        };

        let publish = channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await;
        match publish {
            Ok(confirm) => {
                if let Err(err) = confirm.await {
                    tracing::error!(job_id, error = %err, "Retry publish unconfirmed");
                } else {
                    tracing::info!(job_id, "Republished job for retry");
                }
            }
            Err(err) => {
                tracing::error!(job_id, error = %err, "Failed to republish job; job is dropped");
            }
        }
    }
}

async fn reject(delivery: &Delivery) {
    let options = BasicRejectOptions { requeue: false };
    if let Err(err) = delivery.acker.reject(options).await {
        tracing::error!(error = %err, "Failed to reject message");
    }
}
