//! Kafka transport for [`CommandHandler`]: commands in, replies out.

use anyhow::Result;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use shared::{Command, CommandReply};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::handlers::CommandHandler;

pub fn create_producer(brokers: &str) -> Result<FutureProducer> {
    let producer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()?;
    Ok(producer)
}

pub fn create_consumer(brokers: &str, group_id: &str, topic: &str) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", group_id)
        .set("bootstrap.servers", brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "true")
        .create()?;
    consumer.subscribe(&[topic])?;
    Ok(consumer)
}

pub struct KafkaCommandLoop {
    handler: Arc<CommandHandler>,
    producer: FutureProducer,
    reply_topic: String,
}

impl KafkaCommandLoop {
    pub fn new(handler: Arc<CommandHandler>, producer: FutureProducer, reply_topic: String) -> Self {
        Self { handler, producer, reply_topic }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => match serde_json::from_str::<Command>(json_str) {
                                Ok(command) => {
                                    let reply = self.handler.handle_command(command).await;
                                    if let Err(e) = self.send_reply(reply).await {
                                        error!("Error sending reply: {}", e);
                                    }
                                }
                                Err(e) => error!("Error decoding command: {}", e),
                            },
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, rdkafka::consumer::CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    async fn send_reply(&self, reply: CommandReply) -> Result<()> {
        let json = serde_json::to_string(&reply)?;
        let key = reply.correlation_id.to_string();
        let record = FutureRecord::to(&self.reply_topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send reply: {}", e))?;

        Ok(())
    }
}
