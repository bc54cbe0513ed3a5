//! Target connectors for the device simulator.
//!
//! One [`Connector`] implementation per wire protocol (HTTP, MQTT, Kafka,
//! WebSocket, FTP, Pub/Sub). A connector is built from typed
//! [`TargetSettings`](iotsim_core::target_system::TargetSettings) and opens
//! [`Session`]s; each Device Runner owns exactly one session.
//!
//! Also provides the send failure taxonomy ([`ConnectorError`]),
//! retry/reconnect backoff ([`retry`]), the standalone
//! [`test_connection`](probe::test_connection) probe and the one-shot
//! [`send_once`](probe::send_once) delivery.

pub mod connector;
pub mod error;
pub mod ftp;
pub mod http;
pub mod kafka;
pub mod mqtt;
pub mod probe;
pub mod pubsub;
pub mod retry;
pub mod websocket;

pub use connector::{Ack, Connector, ConnectorFactory, DefaultConnectorFactory, Session};
pub use error::ConnectorError;
pub use probe::{send_once, test_connection, test_connection_config, ConnectionTestResult};
