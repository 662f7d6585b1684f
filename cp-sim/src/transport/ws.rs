//! Persistent WebSocket transport
//!
//! One duplex connection to `endpoint/identity`, negotiating the
//! `ocpp1.6` subprotocol. Calls are exchanged as asynchronous
//! CALL/CALLRESULT frames over this single connection. The transport
//! owns reconnection (exponential backoff) and keepalive pings; the
//! core only observes lifecycle events through the log.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        handshake::client::Request,
        http::{header, Uri},
        protocol::WebSocketConfig,
        Message,
    },
};
use tracing::{debug, error, info, warn};

use super::{CallTransport, InboundCall};
use crate::config::SimulatorConfig;
use crate::ocpp::messages::{Call, CallError, CallResult, OcppError, OcppMessage};

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<CallResult, OcppError>>>>>;

/// The persistent transport handle
pub struct WsTransport {
    outgoing_tx: mpsc::Sender<OcppMessage>,
    pending: Pending,
    request_timeout: std::time::Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl WsTransport {
    /// Spawn the connection loop and return the transport handle plus
    /// the inbound call stream
    pub fn spawn(config: SimulatorConfig) -> (Arc<Self>, mpsc::Receiver<InboundCall>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        let transport = Arc::new(Self {
            outgoing_tx: outgoing_tx.clone(),
            pending: pending.clone(),
            request_timeout: config.request_timeout,
            shutdown_tx,
        });

        tokio::spawn(run(
            config,
            outgoing_rx,
            outgoing_tx,
            inbound_tx,
            pending,
            shutdown_rx,
        ));

        (transport, inbound_rx)
    }

    /// Close the connection and stop reconnecting
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[async_trait::async_trait]
impl CallTransport for WsTransport {
    async fn call(&self, call: Call) -> Result<CallResult, OcppError> {
        let (response_tx, response_rx) = oneshot::channel();
        let message_id = call.message_id.clone();

        self.pending.lock().insert(message_id.clone(), response_tx);

        self.outgoing_tx
            .send(OcppMessage::Call(call))
            .await
            .map_err(|_| OcppError::ConnectionClosed)?;

        match tokio::time::timeout(self.request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OcppError::ConnectionClosed),
            Err(_) => {
                // A late response must not find a dead entry
                self.pending.lock().remove(&message_id);
                Err(OcppError::Timeout)
            }
        }
    }
}

/// Reconnect loop: run one session, back off, try again
async fn run(
    config: SimulatorConfig,
    mut outgoing_rx: mpsc::Receiver<OcppMessage>,
    outgoing_tx: mpsc::Sender<OcppMessage>,
    inbound_tx: mpsc::Sender<InboundCall>,
    pending: Pending,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        info!("Connecting to central system: {}", config.central_url);

        match connect_and_run(
            &config,
            &mut outgoing_rx,
            &outgoing_tx,
            &inbound_tx,
            &pending,
            &mut shutdown_rx,
        )
        .await
        {
            Ok(()) => {
                info!("Persistent transport closed by operator");
                fail_pending(&pending);
                break;
            }
            Err(e) => {
                error!("Connection error: {}", e);
                fail_pending(&pending);

                info!("Reconnecting in {:?}", reconnect_delay);
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
                reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
            }
        }
    }
}

/// Fail every in-flight call when the connection drops
fn fail_pending(pending: &Pending) {
    let mut pending = pending.lock();
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(OcppError::ConnectionClosed));
    }
}

/// Connect and run one session until disconnection or shutdown.
///
/// Returns Ok only on operator shutdown; any drop surfaces as an error
/// so the caller reconnects.
async fn connect_and_run(
    config: &SimulatorConfig,
    outgoing_rx: &mut mpsc::Receiver<OcppMessage>,
    outgoing_tx: &mpsc::Sender<OcppMessage>,
    inbound_tx: &mpsc::Sender<InboundCall>,
    pending: &Pending,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), OcppError> {
    let url = build_endpoint_url(&config.central_url, &config.charge_point_id);
    let uri: Uri = url.parse().map_err(|_| OcppError::InvalidFormat)?;

    let request = Request::builder()
        .uri(&url)
        .header(header::SEC_WEBSOCKET_PROTOCOL, OCPP_SUBPROTOCOL)
        .header(header::HOST, uri.host().unwrap_or("localhost"))
        .body(())
        .map_err(|_| OcppError::InvalidFormat)?;

    let ws_config = WebSocketConfig {
        max_message_size: Some(64 * 1024),
        max_frame_size: Some(16 * 1024),
        ..Default::default()
    };

    let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
        .await
        .map_err(|e| {
            warn!("WebSocket connection failed: {}", e);
            OcppError::ConnectionClosed
        })?;

    let accepted_protocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());

    if accepted_protocol != Some(OCPP_SUBPROTOCOL) {
        warn!(
            "Central system did not accept the {} subprotocol, got: {:?}",
            OCPP_SUBPROTOCOL, accepted_protocol
        );
    }

    info!("WebSocket connected to {}", url);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut keepalive = tokio::time::interval(config.keepalive_timeout);
    keepalive.tick().await; // first tick completes immediately

    loop {
        tokio::select! {
            // Outbound frames
            msg = outgoing_rx.recv() => {
                let Some(msg) = msg else {
                    return Err(OcppError::ConnectionClosed);
                };

                let bytes = match msg.to_bytes() {
                    Ok(b) => b,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                debug!("Sending: {}", String::from_utf8_lossy(&bytes));

                ws_tx
                    .send(Message::Text(String::from_utf8_lossy(&bytes).into_owned()))
                    .await
                    .map_err(|e| {
                        error!("Failed to send WebSocket message: {}", e);
                        OcppError::ConnectionClosed
                    })?;
            }

            // Inbound frames
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received: {}", text);
                        handle_frame(text.as_bytes(), outgoing_tx, inbound_tx, pending).await;
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!("WebSocket closed by server: {:?}", reason);
                        return Err(OcppError::ConnectionClosed);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("Received keepalive pong");
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return Err(OcppError::ConnectionClosed);
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Err(OcppError::ConnectionClosed);
                    }
                    _ => {}
                }
            }

            // Keepalive ping at the configured timeout
            _ = keepalive.tick() => {
                debug!("Sending keepalive ping");
                ws_tx
                    .send(Message::Ping(Vec::new()))
                    .await
                    .map_err(|_| OcppError::ConnectionClosed)?;
            }

            // Operator disconnect
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}

/// Route one parsed frame to the inbound stream or a pending call
async fn handle_frame(
    bytes: &[u8],
    outgoing_tx: &mpsc::Sender<OcppMessage>,
    inbound_tx: &mpsc::Sender<InboundCall>,
    pending: &Pending,
) {
    match OcppMessage::parse(bytes) {
        Ok(OcppMessage::Call(call)) => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let message_id = call.message_id.clone();

            let inbound = InboundCall {
                message_id: call.message_id,
                action: call.action,
                payload: call.payload,
                reply: reply_tx,
            };

            if inbound_tx.send(inbound).await.is_err() {
                error!("Inbound handler gone, dropping {}", message_id);
                return;
            }

            // Relay the handler's answer back over the socket
            let outgoing_tx = outgoing_tx.clone();
            tokio::spawn(async move {
                let msg = match reply_rx.await {
                    Ok(Ok(payload)) => match CallResult::new(message_id.clone(), payload) {
                        Ok(result) => OcppMessage::CallResult(result),
                        Err(e) => {
                            error!("Failed to build CALLRESULT: {}", e);
                            return;
                        }
                    },
                    Ok(Err(fault)) => OcppMessage::CallError(CallError::new(
                        message_id,
                        fault.code,
                        fault.description,
                    )),
                    Err(_) => return,
                };
                let _ = outgoing_tx.send(msg).await;
            });
        }
        Ok(OcppMessage::CallResult(result)) => {
            if let Some(tx) = pending.lock().remove(&result.message_id) {
                let _ = tx.send(Ok(result));
            } else {
                warn!("Unmatched CALLRESULT {}", result.message_id);
            }
        }
        Ok(OcppMessage::CallError(error)) => {
            if let Some(tx) = pending.lock().remove(&error.message_id) {
                let _ = tx.send(Err(OcppError::RemoteError {
                    code: error.error_code,
                    description: error.error_description,
                    details: error.error_details,
                }));
            } else {
                warn!("Unmatched CALLERROR {}", error.message_id);
            }
        }
        Err(e) => {
            warn!("Failed to parse OCPP message: {}", e);
        }
    }
}

/// Build the full WebSocket URL for a charge point identity
pub fn build_endpoint_url(base_url: &str, charge_point_id: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), charge_point_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::messages::Action;
    use crate::ocpp::types::HeartbeatRequest;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_call_leaves_no_pending_entry() {
        let (outgoing_tx, _outgoing_rx) = mpsc::channel(4);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let transport = WsTransport {
            outgoing_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            request_timeout: Duration::from_millis(100),
            shutdown_tx,
        };

        let call = Call::new(Action::Heartbeat, HeartbeatRequest {}).unwrap();
        let err = transport.call(call).await.unwrap_err();

        assert!(matches!(err, OcppError::Timeout));
        assert!(transport.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fail_pending_fails_in_flight_calls() {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().insert("m1".to_string(), tx);

        fail_pending(&pending);

        assert!(matches!(rx.await, Ok(Err(OcppError::ConnectionClosed))));
        assert!(pending.lock().is_empty());
    }

    #[test]
    fn test_build_endpoint_url() {
        let url = build_endpoint_url(
            "ws://localhost:8180/steve/websocket/CentralSystemService",
            "CP-SIM-001",
        );
        assert_eq!(
            url,
            "ws://localhost:8180/steve/websocket/CentralSystemService/CP-SIM-001"
        );

        let url = build_endpoint_url(
            "ws://localhost:8180/steve/websocket/CentralSystemService/",
            "CP-SIM-001",
        );
        assert_eq!(
            url,
            "ws://localhost:8180/steve/websocket/CentralSystemService/CP-SIM-001"
        );
    }
}
