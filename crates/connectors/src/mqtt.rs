//! MQTT connector built on `rumqttc`.
//!
//! Each session owns one broker connection. The `rumqttc` event loop is
//! driven by a background task which forwards publish acknowledgements to
//! the session and records the first connection error so the next send
//! reports [`ConnectorError::ConnectionLost`].

use std::time::Duration;

use async_trait::async_trait;
use iotsim_core::target_system::{MqttSettings, TargetSystemType};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connector::{encode, Ack, Connector, Session};
use crate::error::ConnectorError;

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 16;

/// How long `disconnect` waits for the DISCONNECT packet to flush.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub struct MqttConnector {
    settings: MqttSettings,
    client_id: String,
}

impl MqttConnector {
    /// `client_tag` makes the default client id unique per device.
    pub fn new(settings: MqttSettings, client_tag: &str) -> Self {
        let client_id = settings
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("iotsim-{client_tag}"));
        Self {
            settings,
            client_id,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(&self.client_id, &self.settings.host, self.settings.port);
        opts.set_keep_alive(Duration::from_secs(self.settings.keep_alive.max(5)));
        opts.set_clean_session(true);
        if let Some(username) = self.settings.username.as_deref().filter(|u| !u.is_empty()) {
            opts.set_credentials(username, self.settings.password.clone().unwrap_or_default());
        }
        if self.settings.use_tls {
            opts.set_transport(Transport::tls_with_default_config());
        }
        opts
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

fn qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn classify_connection_error(err: &ConnectionError) -> ConnectorError {
    match err {
        ConnectionError::ConnectionRefused(
            code @ (ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized),
        ) => ConnectorError::Auth(format!("Broker refused connection: {code:?}")),
        ConnectionError::ConnectionRefused(code) => {
            ConnectorError::Protocol(format!("Broker refused connection: {code:?}"))
        }
        ConnectionError::Io(e) => ConnectorError::from_io(e),
        other => ConnectorError::TransientNetwork(other.to_string()),
    }
}

/// Poll the event loop until the broker acknowledges the connection.
async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectorError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(classify_connection_error(&ConnectionError::ConnectionRefused(
                        code,
                    ))),
                };
            }
            Ok(_) => {}
            Err(e) => return Err(classify_connection_error(&e)),
        }
    }
}

/// Drive the event loop for the lifetime of the session.
async fn drive(
    mut eventloop: EventLoop,
    acks: mpsc::UnboundedSender<()>,
    lost: watch::Sender<Option<String>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::PubAck(_) | Packet::PubComp(_))) => {
                    let _ = acks.send(());
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    let _ = lost.send(Some("broker sent DISCONNECT".into()));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "MQTT event loop stopped");
                    let _ = lost.send(Some(e.to_string()));
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl Connector for MqttConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::Mqtt
    }

    fn describe(&self) -> String {
        let scheme = if self.settings.use_tls { "mqtts" } else { "mqtt" };
        format!(
            "{scheme}://{}:{}/{}",
            self.settings.host, self.settings.port, self.settings.topic
        )
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        let timeout = self.connect_timeout();
        tokio::time::timeout(timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| ConnectorError::timeout(timeout))??;

        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let (lost_tx, lost_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(eventloop, ack_tx, lost_tx, cancel.clone()));

        tracing::debug!(client_id = %self.client_id, target = %self.describe(), "MQTT connected");

        Ok(Box::new(MqttSession {
            client,
            topic: self.settings.topic.clone(),
            qos: qos(self.settings.qos),
            retain: self.settings.retain,
            ack_timeout: timeout,
            acks: ack_rx,
            lost: lost_rx,
            cancel,
            driver,
        }))
    }
}

struct MqttSession {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    retain: bool,
    ack_timeout: Duration,
    acks: mpsc::UnboundedReceiver<()>,
    lost: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
    driver: JoinHandle<()>,
}

impl MqttSession {
    fn check_alive(&self) -> Result<(), ConnectorError> {
        match self.lost.borrow().as_ref() {
            Some(reason) => Err(ConnectorError::ConnectionLost(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        self.check_alive()?;
        let body = encode(payload)?;
        let bytes = body.len();

        // Discard acknowledgements left over from an earlier timed-out send.
        while self.acks.try_recv().is_ok() {}

        self.client
            .publish(self.topic.as_str(), self.qos, self.retain, body)
            .await
            .map_err(|e| ConnectorError::ConnectionLost(e.to_string()))?;

        if self.qos == QoS::AtMostOnce {
            return Ok(Ack::new("published (qos 0)", bytes));
        }

        tokio::select! {
            ack = self.acks.recv() => match ack {
                Some(()) => Ok(Ack::new(format!("acknowledged (qos {})", self.qos as u8), bytes)),
                None => {
                    self.check_alive()?;
                    Err(ConnectorError::ConnectionLost("event loop stopped".into()))
                }
            },
            _ = self.lost.changed() => {
                self.check_alive()?;
                Err(ConnectorError::ConnectionLost("event loop stopped".into()))
            }
            _ = tokio::time::sleep(self.ack_timeout) => Err(ConnectorError::timeout(self.ack_timeout)),
        }
    }

    async fn disconnect(self: Box<Self>) {
        let this = *self;
        if let Err(e) = this.client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request failed");
        }
        let mut driver = this.driver;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
            this.cancel.cancel();
            driver.abort();
        }
    }
}
