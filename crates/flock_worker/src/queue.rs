//! SQS consumption for the population and recommendation queues
use crate::errors::WorkerError;
use aws_sdk_sqs::Client as SqsClient;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::Message;
use core::time::Duration;
use flock_core::pipeline::messages::{MessageError, population_ids, recommendation_users};
use flock_core::pipeline::{BatchReport, PopulationPipeline, RecommendationPipeline, Services};
use tracing::{debug, error, info, warn};

/// Pause after a failed receive before polling again
const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub url: String,
    /// Seconds a received message stays hidden from other consumers
    pub visibility_timeout: i32,
    /// Long-poll wait in seconds
    pub wait_time_seconds: i32,
    pub max_messages: i32,
}

pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    pub const fn new(client: SqsClient, config: QueueConfig) -> Self {
        Self { client, config }
    }

    pub async fn receive(&self) -> Result<Vec<Message>, WorkerError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|err| WorkerError::Queue {
                operation: "receive",
                message: DisplayErrorContext(&err).to_string(),
            })?;
        let messages = output.messages.unwrap_or_default();
        debug!(count = messages.len(), "received messages");
        Ok(messages)
    }

    pub async fn delete(&self, receipt_handle: &str) -> Result<(), WorkerError> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|err| WorkerError::Queue {
                operation: "delete",
                message: DisplayErrorContext(&err).to_string(),
            })?;
        debug!("message deleted");
        Ok(())
    }
}

/// Which pipeline a queue feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Populate,
    Recommend,
}

/// What to do with a message once it has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Delete,
    /// Leave it on the queue so it is redelivered after the visibility timeout
    Retain,
}

impl Job {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Populate => "populate",
            Self::Recommend => "recommend",
        }
    }

    /// Parses `body` and runs the pipeline over it
    pub async fn handle(self, services: &Services, body: &str) -> Result<BatchReport, MessageError> {
        match self {
            Self::Populate => {
                let ids = population_ids(body)?;
                Ok(PopulationPipeline::new(services).run(&ids).await)
            }
            Self::Recommend => {
                let users = recommendation_users(body)?;
                Ok(RecommendationPipeline::new(services).run(&users).await)
            }
        }
    }
}

/// Malformed messages can never succeed and are dropped. Aborted batches are retried whole.
pub fn settle(result: &Result<BatchReport, MessageError>) -> Settle {
    match result {
        Ok(report) if report.is_complete() => Settle::Delete,
        Ok(_) => Settle::Retain,
        Err(_) => Settle::Delete,
    }
}

pub fn log_report(job: &str, report: &BatchReport) {
    let summary = report.summary();
    match &report.aborted {
        None => info!(job, items = report.items.len(), ?summary, "batch finished"),
        Some(reason) => warn!(job, items = report.items.len(), ?summary, %reason, "batch aborted"),
    }
}

/// Polls until ctrl-c. A message is deleted only after it was settled as [`Settle::Delete`].
pub async fn poll(queue: &Queue, job: Job, services: &Services) -> Result<(), WorkerError> {
    info!(job = job.name(), url = %queue.config.url, "polling queue");
    loop {
        let messages = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                return Ok(());
            }
            received = queue.receive() => received,
        };
        let messages = match messages {
            Ok(messages) => messages,
            Err(err) => {
                error!(%err, "receive failed, backing off");
                tokio::time::sleep(RECEIVE_BACKOFF).await;
                continue;
            }
        };

        for message in messages {
            let Some(receipt_handle) = message.receipt_handle() else {
                warn!(message_id = ?message.message_id(), "message without receipt handle");
                continue;
            };
            let body = message.body().unwrap_or_default();
            let result = job.handle(services, body).await;
            match &result {
                Ok(report) => log_report(job.name(), report),
                Err(err) => warn!(job = job.name(), %err, "dropping malformed message"),
            }
            match settle(&result) {
                Settle::Delete => queue.delete(receipt_handle).await?,
                Settle::Retain => {
                    warn!(message_id = ?message.message_id(), "message left for redelivery");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn settling() {
        let complete = BatchReport::new();
        assert_eq!(settle(&Ok(complete)), Settle::Delete);

        let mut aborted = BatchReport::new();
        aborted.abort("database unavailable");
        assert_eq!(settle(&Ok(aborted)), Settle::Retain);

        assert_eq!(settle(&Err(MessageError::MissingMessage)), Settle::Delete);
    }
}
