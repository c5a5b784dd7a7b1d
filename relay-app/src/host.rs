//! The host loop: feeds record batches to the sink task and owns offset
//! commit.
//!
//! At-least-once by construction: offsets are committed only after the
//! task reports a clean batch, so a crash or batch failure re-delivers
//! from the last committed position on restart. The task is safe to
//! re-execute a record.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Headers, Message};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use relay_common::{HeaderValue, RecordHeader, RecordValue, SinkRecord};
use relay_config::{BrokerConfig, RelayConfig};
use relay_sink::{HttpSinkTask, SinkTask};
use tokio_util::sync::CancellationToken;

pub async fn run(cfg: &RelayConfig, cancel: CancellationToken) -> Result<()> {
    let mut task = HttpSinkTask::from_config(cfg, cancel.clone())?;
    let consumer = build_consumer(&cfg.broker)?;
    tracing::info!(
        topics = ?cfg.broker.topics,
        group = %cfg.broker.group_id,
        "consuming"
    );

    let linger = Duration::from_millis(cfg.broker.batch_linger_ms);
    loop {
        // Block on the first record of a batch, or on shutdown.
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = consumer.recv() => polled.context("consumer poll failed")?,
        };

        let mut batch = vec![convert(&first)];
        let mut offsets: HashMap<(String, i32), i64> = HashMap::new();
        offsets.insert((first.topic().to_string(), first.partition()), first.offset());
        drop(first);

        // Drain whatever else arrives within the linger window.
        let deadline = tokio::time::Instant::now() + linger;
        while batch.len() < cfg.broker.max_batch_records {
            match tokio::time::timeout_at(deadline, consumer.recv()).await {
                Ok(Ok(message)) => {
                    let key = (message.topic().to_string(), message.partition());
                    let highest = offsets.entry(key).or_insert(message.offset());
                    *highest = (*highest).max(message.offset());
                    batch.push(convert(&message));
                }
                Ok(Err(e)) => return Err(e).context("consumer poll failed"),
                Err(_) => break,
            }
        }

        let batch_len = batch.len();
        task.put(batch).await?;

        let mut committed = TopicPartitionList::new();
        for ((topic, partition), offset) in &offsets {
            committed
                .add_partition_offset(topic, *partition, Offset::Offset(offset + 1))
                .context("building commit list failed")?;
        }
        consumer
            .commit(&committed, CommitMode::Sync)
            .context("offset commit failed")?;
        tracing::debug!(records = batch_len, "batch committed");
    }

    task.stop().await?;
    Ok(())
}

fn build_consumer(cfg: &BrokerConfig) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &cfg.bootstrap_servers)
        .set("group.id", &cfg.group_id)
        .set("client.id", "relay-http-sink")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .context("consumer init failed")?;
    let topics: Vec<&str> = cfg.topics.iter().map(String::as_str).collect();
    consumer
        .subscribe(&topics)
        .context("topic subscription failed")?;
    Ok(consumer)
}

/// Decode one broker message into the pipeline's record model.
fn convert<M: Message>(message: &M) -> SinkRecord {
    let headers = message
        .headers()
        .map(|hs| {
            hs.iter()
                .map(|h| {
                    let value = match h.value {
                        Some(bytes) => match std::str::from_utf8(bytes) {
                            Ok(text) => HeaderValue::Text(text.to_string()),
                            Err(_) => HeaderValue::Bytes(bytes.to_vec()),
                        },
                        None => HeaderValue::Null,
                    };
                    RecordHeader::new(h.key, value)
                })
                .collect()
        })
        .unwrap_or_default();

    SinkRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        headers,
        value: match message.payload() {
            Some(payload) => RecordValue::Bytes(payload.to_vec()),
            None => RecordValue::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::{Header, OwnedHeaders, OwnedMessage, Timestamp};

    fn message(payload: Option<&[u8]>) -> OwnedMessage {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "trace-id",
                value: Some(b"t1".as_slice()),
            })
            .insert(Header {
                key: "raw",
                value: Some(&[0xffu8, 0xfe][..]),
            })
            .insert(Header {
                key: "empty",
                value: None::<&[u8]>,
            });
        OwnedMessage::new(
            payload.map(|p| p.to_vec()),
            Some(b"k1".to_vec()),
            "events".to_string(),
            Timestamp::CreateTime(1_700_000_000_000),
            3,
            42,
            Some(headers),
        )
    }

    #[test]
    fn conversion_preserves_coordinates_and_headers() {
        let record = convert(&message(Some(b"{\"a\":1}")));

        assert_eq!(record.topic, "events");
        assert_eq!(record.partition, 3);
        assert_eq!(record.offset, 42);
        assert_eq!(record.timestamp, Some(1_700_000_000_000));
        assert_eq!(record.key.as_deref(), Some("k1"));
        assert_eq!(record.value, RecordValue::Bytes(b"{\"a\":1}".to_vec()));

        assert_eq!(record.headers.len(), 3);
        assert_eq!(record.headers[0].name, "trace-id");
        assert_eq!(record.headers[0].value, HeaderValue::Text("t1".into()));
        assert_eq!(record.headers[1].value, HeaderValue::Bytes(vec![0xff, 0xfe]));
        assert_eq!(record.headers[2].value, HeaderValue::Null);
    }

    #[test]
    fn missing_payload_becomes_a_null_value() {
        let record = convert(&message(None));
        assert!(record.value.is_null());
    }
}
