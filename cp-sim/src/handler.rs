//! Inbound remote command handler
//!
//! Answers calls arriving from the central system, delegating to the
//! transaction controller and the configuration store. Commands with no
//! simulated hardware behind them (unlock, reset, firmware, ...) are
//! acknowledged and otherwise ignored.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::ocpp::messages::{Action, ErrorCode};
use crate::ocpp::types::*;
use crate::proxy::CentralSystemProxy;
use crate::store::ConfigurationStore;
use crate::transaction::TransactionController;
use crate::transport::CallFault;

/// The inbound call surface
pub struct RemoteCommandHandler {
    controller: Arc<TransactionController>,
    store: Arc<ConfigurationStore>,
    proxy: Arc<CentralSystemProxy>,
    connector_id: i32,
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, CallFault> {
    serde_json::from_value(payload)
        .map_err(|e| CallFault::new(ErrorCode::FormationViolation, e.to_string()))
}

fn respond<T: serde::Serialize>(response: T) -> Result<Value, CallFault> {
    serde_json::to_value(response).map_err(|e| CallFault::new(ErrorCode::InternalError, e.to_string()))
}

impl RemoteCommandHandler {
    pub fn new(
        controller: Arc<TransactionController>,
        store: Arc<ConfigurationStore>,
        proxy: Arc<CentralSystemProxy>,
        connector_id: i32,
    ) -> Self {
        Self {
            controller,
            store,
            proxy,
            connector_id,
        }
    }

    /// Handle one inbound call, producing the response payload
    pub async fn handle(&self, action: Action, payload: Value) -> Result<Value, CallFault> {
        match action {
            Action::RemoteStartTransaction => {
                let req: RemoteStartTransactionRequest = parse(payload)?;
                let connector = req.connector_id.unwrap_or(self.connector_id);
                let started = self.controller.start(connector, &req.id_tag, true);
                info!(
                    "RemoteStartTransaction for {} on connector {}: {}",
                    req.id_tag,
                    connector,
                    if started { "Accepted" } else { "Rejected" }
                );
                respond(RemoteStartTransactionResponse {
                    status: if started {
                        GenericStatus::Accepted
                    } else {
                        GenericStatus::Rejected
                    },
                })
            }

            Action::RemoteStopTransaction => {
                let req: RemoteStopTransactionRequest = parse(payload)?;
                let stopped = self.controller.stop(true);
                info!(
                    "RemoteStopTransaction for transaction {}: stop {}",
                    req.transaction_id,
                    if stopped { "scheduled" } else { "ignored, no active transaction" }
                );

                // Always announce Finishing, whether or not a stop ran
                if let Err(e) = self
                    .proxy
                    .status_notification(self.connector_id, ChargePointStatus::Finishing)
                    .await
                {
                    warn!("StatusNotification failed: {}", e);
                }

                respond(RemoteStopTransactionResponse {
                    status: GenericStatus::Accepted,
                })
            }

            // Hardware stubs: acknowledged, no state change
            Action::UnlockConnector
            | Action::ChangeAvailability
            | Action::ClearCache
            | Action::ReserveNow
            | Action::CancelReservation
            | Action::Reset
            | Action::UpdateFirmware => {
                info!("{} acknowledged (no simulated hardware)", action);
                respond(GenericStatusResponse::accepted())
            }

            Action::GetConfiguration => {
                let configuration_key = self.store.key_values().await;
                respond(GetConfigurationResponse {
                    configuration_key,
                    unknown_key: Vec::new(),
                })
            }

            Action::ChangeConfiguration => {
                let req: ChangeConfigurationRequest = parse(payload)?;
                let status = self.store.set(&req.key, &req.value);
                respond(ChangeConfigurationResponse { status })
            }

            Action::SendLocalList => {
                let req: SendLocalListRequest = parse(payload)?;
                let list = req.local_authorization_list.unwrap_or_default();
                let serialized = serde_json::to_string(&list)
                    .map_err(|e| CallFault::new(ErrorCode::InternalError, e.to_string()))?;
                self.store.set_local_authorization_list(&serialized);
                info!(
                    "SendLocalList version {} with {} entries",
                    req.list_version,
                    list.len()
                );
                respond(SendLocalListResponse {
                    status: UpdateStatus::Accepted,
                })
            }

            Action::TriggerMessage => {
                let _: TriggerMessageRequest = parse(payload)?;
                if let Err(e) = self.controller.emit_meter_values_now(self.connector_id).await {
                    warn!("Triggered MeterValues failed: {}", e);
                }
                respond(TriggerMessageResponse {
                    status: GenericStatus::Accepted,
                })
            }

            // Outbound-only actions have no inbound meaning
            other => Err(CallFault::new(
                ErrorCode::NotImplemented,
                format!("{} is not handled by the charge point", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::testutil::MockTransport;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::sleep;

    fn setup() -> (Arc<MockTransport>, RemoteCommandHandler) {
        let config = SimulatorConfig::default()
            .with_delays(Duration::from_secs(2), Duration::from_secs(2))
            .with_telemetry_interval(Duration::from_secs(5));
        let mock = MockTransport::new();
        let proxy = Arc::new(CentralSystemProxy::new(mock.clone(), &config));
        let store = Arc::new(ConfigurationStore::new(&config));
        let controller = Arc::new(TransactionController::new(proxy.clone(), &config));
        let handler = RemoteCommandHandler::new(controller, store, proxy, config.connector_id);
        (mock, handler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_start_accepted_then_deferred_call() {
        let (mock, handler) = setup();

        let resp = handler
            .handle(
                Action::RemoteStartTransaction,
                json!({"idTag": "CAFE01"}),
            )
            .await
            .unwrap();
        assert_eq!(resp["status"], "Accepted");

        // The outbound StartTransaction only fires after the configured
        // start delay
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(mock.count(Action::StartTransaction), 0);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(mock.count(Action::StartTransaction), 1);
        let start = &mock.calls_of(Action::StartTransaction)[0];
        assert_eq!(start.payload["idTag"], "CAFE01");
        assert_eq!(start.payload["connectorId"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_start_rejected_while_active() {
        let (_, handler) = setup();

        let first = handler
            .handle(Action::RemoteStartTransaction, json!({"idTag": "A"}))
            .await
            .unwrap();
        assert_eq!(first["status"], "Accepted");

        let second = handler
            .handle(Action::RemoteStartTransaction, json!({"idTag": "B"}))
            .await
            .unwrap();
        assert_eq!(second["status"], "Rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_stop_always_accepted_and_finishing() {
        let (mock, handler) = setup();

        // No active transaction, still Accepted plus a Finishing status
        let resp = handler
            .handle(Action::RemoteStopTransaction, json!({"transactionId": 7}))
            .await
            .unwrap();
        assert_eq!(resp["status"], "Accepted");

        let statuses = mock.calls_of(Action::StatusNotification);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].payload["status"], "Finishing");
        assert_eq!(mock.count(Action::StopTransaction), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_stubs_accepted() {
        let (mock, handler) = setup();

        for (action, payload) in [
            (Action::UnlockConnector, json!({"connectorId": 1})),
            (Action::ClearCache, json!({})),
            (Action::Reset, json!({"type": "Soft"})),
        ] {
            let resp = handler.handle(action, payload).await.unwrap();
            assert_eq!(resp["status"], "Accepted");
        }

        // Stubs never call out
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_and_change_configuration() {
        let (_, handler) = setup();

        let resp = handler
            .handle(
                Action::ChangeConfiguration,
                json!({"key": "HeartbeatInterval", "value": "60"}),
            )
            .await
            .unwrap();
        assert_eq!(resp["status"], "Accepted");

        let resp = handler
            .handle(Action::GetConfiguration, json!({}))
            .await
            .unwrap();
        let keys = resp["configurationKey"].as_array().unwrap();
        let hb = keys
            .iter()
            .find(|k| k["key"] == "HeartbeatInterval")
            .unwrap();
        assert_eq!(hb["value"], "60");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_local_list_touches_one_entry() {
        let (_, handler) = setup();

        let before = handler
            .handle(Action::GetConfiguration, json!({}))
            .await
            .unwrap();

        let resp = handler
            .handle(
                Action::SendLocalList,
                json!({
                    "listVersion": 2,
                    "updateType": "Full",
                    "localAuthorizationList": [{"idTag": "CAFE01"}],
                }),
            )
            .await
            .unwrap();
        assert_eq!(resp["status"], "Accepted");

        let after = handler
            .handle(Action::GetConfiguration, json!({}))
            .await
            .unwrap();

        let before = before["configurationKey"].as_array().unwrap();
        let after = after["configurationKey"].as_array().unwrap();
        for (b, a) in before.iter().zip(after.iter()) {
            if b["key"] == "LocalAuthListEnabled" {
                assert_ne!(a["value"], b["value"]);
                assert!(a["value"].as_str().unwrap().contains("CAFE01"));
            } else {
                assert_eq!(a["value"], b["value"]);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_message_emits_meter_values() {
        let (mock, handler) = setup();

        let resp = handler
            .handle(
                Action::TriggerMessage,
                json!({"requestedMessage": "MeterValues"}),
            )
            .await
            .unwrap();
        assert_eq!(resp["status"], "Accepted");
        assert_eq!(mock.count(Action::MeterValues), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_faults() {
        let (_, handler) = setup();

        let err = handler
            .handle(Action::RemoteStartTransaction, json!({"noIdTag": true}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::FormationViolation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_action_not_implemented_inbound() {
        let (_, handler) = setup();

        let err = handler
            .handle(Action::StatusNotification, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotImplemented);
    }
}
