//! Request/response transport
//!
//! Binds an inbound HTTP listener on the configured port implementing
//! the full inbound call surface, and pairs it with an outbound client
//! addressed at the central endpoint. Calls are structured JSON
//! envelopes identifying the action by name; each call is one discrete
//! round trip, and the central system reaches the listener through the
//! callback address the envelope advertises.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{CallTransport, InboundCall};
use crate::config::SimulatorConfig;
use crate::ocpp::messages::{Action, Call, CallResult, OcppError};

/// Wire envelope for one call in either direction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    pub action: String,
    pub charge_box_identity: String,
    /// Callback address the sender can be reached at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub payload: serde_json::Value,
}

/// The request/response transport handle
pub struct HttpTransport {
    client: reqwest::Client,
    central_url: String,
    charge_point_id: String,
    callback_url: String,
}

impl HttpTransport {
    /// Bind the inbound listener and build the outbound client
    pub async fn bind(
        config: &SimulatorConfig,
        port: u16,
    ) -> Result<(Self, mpsc::Receiver<InboundCall>), OcppError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        // The listener binds the wildcard address; the advertised
        // callback must carry a host the central system can route to.
        let callback_url = format!(
            "http://{}:{}/ocpp",
            config.callback_host,
            local_addr.port()
        );

        info!(
            "Inbound listener bound on {}, advertising {}",
            local_addr, callback_url
        );

        let app = Router::new()
            .route("/ocpp", post(handle_envelope))
            .with_state(inbound_tx);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Inbound listener failed: {}", e);
            }
        });

        let transport = Self {
            client: reqwest::Client::new(),
            central_url: config.central_url.clone(),
            charge_point_id: config.charge_point_id.clone(),
            callback_url,
        };

        Ok((transport, inbound_rx))
    }
}

#[async_trait::async_trait]
impl CallTransport for HttpTransport {
    async fn call(&self, call: Call) -> Result<CallResult, OcppError> {
        let envelope = CallEnvelope {
            action: call.action.to_string(),
            charge_box_identity: self.charge_point_id.clone(),
            from: Some(self.callback_url.clone()),
            payload: call.payload,
        };

        debug!("POST {} {}", self.central_url, envelope.action);

        let response = self
            .client
            .post(&self.central_url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| OcppError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| OcppError::Transport(e.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OcppError::Transport(e.to_string()))?;

        Ok(CallResult {
            message_id: call.message_id,
            payload,
        })
    }
}

/// Accept one inbound envelope, hand it to the command handler, relay
/// the answer as the HTTP response body
async fn handle_envelope(
    State(inbound_tx): State<mpsc::Sender<InboundCall>>,
    Json(envelope): Json<CallEnvelope>,
) -> Response {
    let action: Action = match envelope.action.parse() {
        Ok(action) => action,
        Err(e) => {
            warn!("Rejecting inbound envelope: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "errorCode": "NotImplemented",
                    "errorDescription": format!("{}", e),
                })),
            )
                .into_response();
        }
    };

    debug!(
        "Inbound {} from {}",
        envelope.action, envelope.charge_box_identity
    );

    let (reply_tx, reply_rx) = oneshot::channel();
    let inbound = InboundCall {
        message_id: Uuid::new_v4().to_string(),
        action,
        payload: envelope.payload,
        reply: reply_tx,
    };

    if inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match reply_rx.await {
        Ok(Ok(payload)) => Json(payload).into_response(),
        Ok(Err(fault)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "errorCode": format!("{:?}", fault.code),
                "errorDescription": fault.description,
            })),
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_names() {
        let envelope = CallEnvelope {
            action: "BootNotification".into(),
            charge_box_identity: "CP-SIM-001".into(),
            from: Some("http://127.0.0.1:12801/ocpp".into()),
            payload: serde_json::json!({"chargePointVendor": "cp-sim"}),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["action"], "BootNotification");
        assert_eq!(json["chargeBoxIdentity"], "CP-SIM-001");
        assert_eq!(json["from"], "http://127.0.0.1:12801/ocpp");
        assert_eq!(json["payload"]["chargePointVendor"], "cp-sim");
    }

    #[tokio::test]
    async fn test_callback_url_uses_configured_host() {
        let config = SimulatorConfig::new("http://localhost:9000/ocpp", "CP001").with_bind_port(0);
        let (transport, _rx) = HttpTransport::bind(&config, 0).await.unwrap();
        assert!(transport.callback_url.starts_with("http://localhost:"));
        assert!(!transport.callback_url.contains("0.0.0.0"));
        assert!(transport.callback_url.ends_with("/ocpp"));
    }

    #[tokio::test]
    async fn test_callback_url_with_explicit_host() {
        let config = SimulatorConfig::new("http://localhost:9000/ocpp", "CP001")
            .with_bind_port(0)
            .with_callback_host("203.0.113.7");
        let (transport, _rx) = HttpTransport::bind(&config, 0).await.unwrap();
        assert!(transport.callback_url.starts_with("http://203.0.113.7:"));
    }

    #[test]
    fn test_envelope_parse_without_callback() {
        let json = r#"{
            "action": "RemoteStopTransaction",
            "chargeBoxIdentity": "CP-SIM-001",
            "payload": {"transactionId": 7}
        }"#;

        let envelope: CallEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.action, "RemoteStopTransaction");
        assert!(envelope.from.is_none());
    }
}
