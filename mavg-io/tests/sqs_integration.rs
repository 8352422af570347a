#![cfg(feature = "sqs")]

use std::time::Duration;

use mavg_core::config::QueueConfig;
use mavg_core::{Context, Event, Result, Source};
use mavg_io::{Queue, QueueSource, SqsQueue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct ChanCtx {
    tx: mpsc::UnboundedSender<Event>,
}

#[async_trait::async_trait]
impl Context for ChanCtx {
    async fn collect(&mut self, event: Event) -> Result<()> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[tokio::test]
async fn sqs_roundtrip_basic_if_env_present() {
    let queue_url = match std::env::var("MAVG_SQS_QUEUE_URL") {
        Ok(v) => v,
        Err(_) => return,
    }; // skip if not configured
    let cfg = QueueConfig {
        endpoint_url: std::env::var("MAVG_SQS_ENDPOINT").ok(),
        wait_time_seconds: 1,
        ..QueueConfig::default()
    };

    // Produce a couple of records through the raw client
    let shared = {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ep) = &cfg.endpoint_url {
            loader = loader.endpoint_url(ep);
        }
        loader.load().await
    };
    let client = aws_sdk_sqs::Client::new(&shared);
    for (i, d) in [20u64, 31].iter().enumerate() {
        let body = format!(
            r#"{{"timestamp": "2018-12-26 18:1{}:08.509654", "duration": {}}}"#,
            i, d
        );
        client
            .send_message()
            .queue_url(&queue_url)
            .message_body(body)
            .send()
            .await
            .expect("send message");
    }

    let queue = SqsQueue::from_client(client, queue_url.clone(), &cfg);
    assert_eq!(queue.queue_url(), queue_url);
    let cancel = CancellationToken::new();
    let mut src = QueueSource::new(queue, cancel.clone())
        .with_backoff(Duration::from_millis(50), Duration::from_millis(200));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut ctx = ChanCtx { tx };
        let _ = src.run(&mut ctx).await;
        src
    });

    // Wait to receive at least 2 events or timeout
    let mut got = 0usize;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while got < 2 && tokio::time::Instant::now() < deadline {
        if let Ok(Some(_)) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            got += 1;
        }
    }

    cancel.cancel();
    let src = handle.await.expect("poller task");
    assert!(got >= 1, "did not receive any events from SQS");

    // aggregated messages were deleted; nothing of ours should come back quickly
    let left = src.queue().receive().await.unwrap_or_default();
    assert!(left.len() <= 1);
}
