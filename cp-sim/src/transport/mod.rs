//! Transport bindings to the central system
//!
//! Two mutually exclusive ways to exchange OCPP calls:
//!
//! - `ws`: one persistent WebSocket with the `ocpp1.6` subprotocol,
//!   automatic reconnection and keepalive pings
//! - `http`: a bound inbound HTTP listener paired with an outbound HTTP
//!   client, each call a discrete round trip
//!
//! The variant is chosen once, at startup, by whether a bind port is
//! configured. Both variants expose the same two surfaces: a
//! [`CallTransport`] for outbound calls and an [`InboundCall`] stream for
//! requests arriving from the central system.

pub mod http;
pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::config::SimulatorConfig;
use crate::ocpp::messages::{Action, Call, CallResult, ErrorCode, OcppError};

/// Outbound call surface shared by both transport variants
#[async_trait]
pub trait CallTransport: Send + Sync {
    /// Send one call and wait for the matching result
    async fn call(&self, call: Call) -> Result<CallResult, OcppError>;
}

/// Failure produced by the inbound command handler
#[derive(Debug, Clone)]
pub struct CallFault {
    pub code: ErrorCode,
    pub description: String,
}

impl CallFault {
    pub fn new(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// One request arriving from the central system.
///
/// The receiver answers by completing `reply`; the transport turns the
/// result into a CALLRESULT or CALLERROR in its own wire format.
#[derive(Debug)]
pub struct InboundCall {
    pub message_id: String,
    pub action: Action,
    pub payload: serde_json::Value,
    pub reply: oneshot::Sender<Result<serde_json::Value, CallFault>>,
}

/// Which transport variant a binding runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Persistent,
    RequestResponse,
}

/// A connected transport binding
pub struct TransportBinding {
    kind: TransportKind,
    transport: Arc<dyn CallTransport>,
    ws: Option<Arc<ws::WsTransport>>,
}

impl TransportBinding {
    /// Connect the variant selected by the configuration.
    ///
    /// A configured bind port selects the request/response variant; its
    /// absence selects the persistent variant. The choice is permanent
    /// for the binding's lifetime.
    pub async fn connect(
        config: &SimulatorConfig,
    ) -> Result<(Self, mpsc::Receiver<InboundCall>), OcppError> {
        match config.bind_port {
            Some(port) => {
                let (transport, inbound_rx) = http::HttpTransport::bind(config, port).await?;
                Ok((
                    Self {
                        kind: TransportKind::RequestResponse,
                        transport: Arc::new(transport),
                        ws: None,
                    },
                    inbound_rx,
                ))
            }
            None => {
                let (transport, inbound_rx) = ws::WsTransport::spawn(config.clone());
                Ok((
                    Self {
                        kind: TransportKind::Persistent,
                        transport: transport.clone(),
                        ws: Some(transport),
                    },
                    inbound_rx,
                ))
            }
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Shared handle to the outbound call surface
    pub fn transport(&self) -> Arc<dyn CallTransport> {
        self.transport.clone()
    }

    /// Tear down the persistent connection. A no-op on the
    /// request/response variant, which has no session to close.
    pub fn disconnect(&self) {
        match &self.ws {
            Some(ws) => ws.disconnect(),
            None => warn!("disconnect is only meaningful on the persistent transport"),
        }
    }
}
