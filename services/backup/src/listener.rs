//! MQTT intake listener.
//!
//! Owns the broker connection, (re-)subscribes to `{root}/+/+` on every
//! CONNACK and hands each publish to the [`BackupHandler`]. Messages are
//! processed one at a time; the event loop is not polled while a message is
//! being written.

use crate::config::MqttConfig;
use crate::error::Disposition;
use crate::handler::BackupHandler;
use chrono::Utc;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS, SubscribeReasonCode,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Time allowed for the DISCONNECT packet to leave on shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that end a listener run
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),

    #[error("Failed to connect to MQTT broker: {0}")]
    Connect(#[source] ConnectionError),

    #[error("MQTT connection lost: {0}")]
    ConnectionLost(#[source] ConnectionError),

    #[error("Failed to subscribe to {filter}: {source}")]
    Subscribe {
        filter: String,
        #[source]
        source: ClientError,
    },
}

/// State of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

fn qos(level: u8) -> Result<QoS, ListenerError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ListenerError::InvalidQos(other)),
    }
}

/// Subscribes to sensor topics and feeds publishes to the backup handler
pub struct IntakeListener {
    client: AsyncClient,
    eventloop: EventLoop,
    filter: String,
    qos: QoS,
    handler: Arc<BackupHandler>,
    state: watch::Sender<ConnectionState>,
}

impl IntakeListener {
    /// Create the MQTT client. No connection is made until [`run`](Self::run).
    pub fn new(
        config: &MqttConfig,
        handler: Arc<BackupHandler>,
        state: watch::Sender<ConnectionState>,
    ) -> Result<Self, ListenerError> {
        let qos = qos(config.qos)?;

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options
            .set_keep_alive(config.keep_alive())
            .set_clean_session(config.clean_session)
            .set_max_packet_size(config.max_packet_size_bytes, config.max_packet_size_bytes);

        if let (Some(ref username), Some(ref password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);

        info!(
            host = %config.host,
            port = config.port,
            filter = %config.topic_filter(),
            "MQTT listener initialized"
        );

        Ok(Self {
            client,
            eventloop,
            filter: config.topic_filter(),
            qos,
            handler,
            state,
        })
    }

    /// Subscription filter
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Publish a new connection state
    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Run until cancelled or until the broker connection fails.
    ///
    /// Returns `Ok(())` only on cancellation. A later call resumes with a
    /// fresh connection attempt.
    pub async fn run(&mut self, token: &CancellationToken) -> Result<(), ListenerError> {
        let mut connected = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                event = self.eventloop.poll() => Some(event),
            };

            let Some(event) = event else {
                self.shutdown().await;
                return Ok(());
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    connected = true;
                    self.set_state(ConnectionState::Connected);
                    info!(session_present = ack.session_present, "Connected to MQTT broker");

                    self.client
                        .try_subscribe(self.filter.as_str(), self.qos)
                        .map_err(|source| ListenerError::Subscribe {
                            filter: self.filter.clone(),
                            source,
                        })?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        warn!(filter = %self.filter, "Broker rejected subscription");
                    } else {
                        info!(filter = %self.filter, "Subscribed to MQTT topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let handler = self.handler.clone();
                    Self::dispatch(&handler, &publish.topic, &publish.payload).await;
                }
                Ok(other) => {
                    debug!(event = ?other, "MQTT event");
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(if connected {
                        ListenerError::ConnectionLost(e)
                    } else {
                        ListenerError::Connect(e)
                    });
                }
            }
        }
    }

    /// Handle a single publish. Failures are logged and counted, never returned.
    async fn dispatch(handler: &BackupHandler, topic: &str, payload: &[u8]) {
        let received_at = Utc::now();
        metrics::counter!("backup.messages.received").increment(1);

        match handler.handle(topic, payload, received_at).await {
            Ok(placement) => {
                metrics::counter!("backup.messages.stored").increment(1);
                metrics::counter!("backup.bytes.stored")
                    .increment((placement.metadata_bytes + placement.payload_bytes) as u64);

                info!(
                    topic = %topic,
                    base_path = %placement.base_path,
                    size_bytes = placement.payload_bytes,
                    "Stored envelope"
                );
            }
            Err(e) => match e.disposition() {
                Disposition::Drop => {
                    metrics::counter!("backup.messages.dropped", "reason" => e.kind())
                        .increment(1);
                    warn!(topic = %topic, error = %e, "Dropping message");
                }
                Disposition::Operational => {
                    metrics::counter!("backup.messages.failed", "reason" => e.kind())
                        .increment(1);
                    error!(topic = %topic, error = %e, "Failed to back up message");
                }
            },
        }
    }

    async fn shutdown(&mut self) {
        info!("Disconnecting from MQTT broker");

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
        }

        let eventloop = &mut self.eventloop;
        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("Timed out waiting for DISCONNECT to flush");
        }

        self.set_state(ConnectionState::Disconnected);
    }
}
