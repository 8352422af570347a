//! Amazon SQS implementation of `Queue` (enable with the `sqs` feature, on by default).

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client;
use mavg_core::config::QueueConfig;
use mavg_core::{Error, Result};
use tracing::debug;

use crate::queue::{Queue, QueueMessage};

pub struct SqsQueue {
    client: Client,
    queue_url: String,
    max_messages: i32,
    wait_time_seconds: i32,
}

impl SqsQueue {
    /// Build a client from the default AWS credential/region chain.
    pub async fn connect(queue_url: impl Into<String>, cfg: &QueueConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &cfg.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        Self::from_client(Client::new(&shared), queue_url, cfg)
    }

    pub fn from_client(client: Client, queue_url: impl Into<String>, cfg: &QueueConfig) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
            max_messages: cfg.max_messages,
            wait_time_seconds: cfg.wait_time_seconds,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl Queue for SqsQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(self.max_messages)
            .wait_time_seconds(self.wait_time_seconds)
            .send()
            .await
            .map_err(|e| {
                Error::Queue(format!(
                    "could not receive message from sqs: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        let messages: Vec<QueueMessage> = out
            .messages()
            .iter()
            .map(|m| QueueMessage {
                id: m.message_id().map(str::to_string),
                receipt_handle: m.receipt_handle().map(str::to_string),
                body: m.body().map(str::to_string),
            })
            .collect();
        debug!(count = messages.len(), "sqs receive");
        Ok(messages)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<()> {
        let handle = message
            .receipt_handle
            .as_deref()
            .ok_or_else(|| Error::Queue("message has no receipt handle".into()))?;
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(handle)
            .send()
            .await
            .map_err(|e| {
                Error::Queue(format!(
                    "could not delete message from sqs: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
