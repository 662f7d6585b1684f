//! Simulator wiring
//!
//! Startup selects one transport binding, builds the central system
//! proxy, registers the remote command handler against inbound calls and
//! starts the heartbeat scheduler. The public operations mirror the
//! operator console.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::handler::RemoteCommandHandler;
use crate::ocpp::messages::OcppError;
use crate::ocpp::types::{
    AuthorizeResponse, BootNotificationResponse, ChargePointStatus, DataTransferResponse,
};
use crate::proxy::CentralSystemProxy;
use crate::store::{ConfigurationEntry, ConfigurationStore};
use crate::transaction::TransactionController;
use crate::transport::{InboundCall, TransportBinding, TransportKind};

/// One simulated charge point
pub struct Simulator {
    config: SimulatorConfig,
    binding: TransportBinding,
    proxy: Arc<CentralSystemProxy>,
    store: Arc<ConfigurationStore>,
    controller: Arc<TransactionController>,
}

impl Simulator {
    /// Select the transport, wire the components, start the background
    /// tasks
    pub async fn connect(config: SimulatorConfig) -> Result<Self, OcppError> {
        let (binding, inbound_rx) = TransportBinding::connect(&config).await?;

        let proxy = Arc::new(CentralSystemProxy::new(binding.transport(), &config));
        let store = Arc::new(ConfigurationStore::new(&config));
        let controller = Arc::new(TransactionController::new(proxy.clone(), &config));

        let handler = RemoteCommandHandler::new(
            controller.clone(),
            store.clone(),
            proxy.clone(),
            config.connector_id,
        );
        tokio::spawn(dispatch_inbound(inbound_rx, handler));

        spawn_heartbeat(proxy.clone(), config.heartbeat_interval);

        info!(
            "Simulator up: identity={}, connector={}, transport={:?}",
            config.charge_point_id,
            config.connector_id,
            binding.kind()
        );

        Ok(Self {
            config,
            binding,
            proxy,
            store,
            controller,
        })
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.binding.kind()
    }

    pub async fn boot_notification(
        &self,
        with_details: bool,
    ) -> Result<BootNotificationResponse, OcppError> {
        self.proxy.boot_notification(with_details).await
    }

    pub async fn authorize(&self) -> Result<AuthorizeResponse, OcppError> {
        self.proxy.authorize(&self.config.id_tag).await
    }

    pub async fn data_transfer(
        &self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
    ) -> Result<DataTransferResponse, OcppError> {
        self.proxy.data_transfer(vendor_id, message_id, data).await
    }

    pub async fn status_notification(&self, status: ChargePointStatus) -> Result<(), OcppError> {
        self.proxy
            .status_notification(self.config.connector_id, status)
            .await
    }

    /// Operator-triggered start: uses the fixed short delay
    pub fn start_transaction(&self) -> bool {
        self.controller
            .start(self.config.connector_id, &self.config.id_tag, false)
    }

    /// Operator-triggered stop: no deferral
    pub fn stop_transaction(&self) -> bool {
        self.controller.stop(false)
    }

    pub async fn configuration(&self) -> Vec<ConfigurationEntry> {
        self.store.get().await
    }

    /// Tear down the persistent transport's connection
    pub fn disconnect(&self) {
        self.binding.disconnect()
    }
}

/// Feed inbound calls through the command handler, one at a time
async fn dispatch_inbound(mut inbound_rx: mpsc::Receiver<InboundCall>, handler: RemoteCommandHandler) {
    while let Some(call) = inbound_rx.recv().await {
        let InboundCall {
            message_id,
            action,
            payload,
            reply,
        } = call;

        info!("Inbound {} ({})", action, message_id);
        let result = handler.handle(action, payload).await;
        if reply.send(result).is_err() {
            warn!("Inbound caller went away before the reply ({})", message_id);
        }
    }
}

/// One Heartbeat per interval for the simulator's lifetime. Failures are
/// logged, never retried or escalated.
pub(crate) fn spawn_heartbeat(
    proxy: Arc<CentralSystemProxy>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("Heartbeat disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            match proxy.heartbeat().await {
                Ok(resp) => debug!("Heartbeat acknowledged at {}", resp.current_time),
                Err(e) => warn!("Heartbeat failed: {}", e),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::messages::Action;
    use crate::testutil::MockTransport;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_period() {
        let config = SimulatorConfig::default();
        let mock = MockTransport::new();
        let proxy = Arc::new(CentralSystemProxy::new(mock.clone(), &config));

        let handle = spawn_heartbeat(proxy, Duration::from_secs(10));
        assert!(handle.is_some());

        sleep(Duration::from_millis(30_500)).await;
        assert_eq!(mock.count(Action::Heartbeat), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables_heartbeat() {
        let config = SimulatorConfig::default();
        let mock = MockTransport::new();
        let proxy = Arc::new(CentralSystemProxy::new(mock.clone(), &config));

        assert!(spawn_heartbeat(proxy, Duration::ZERO).is_none());

        sleep(Duration::from_secs(120)).await;
        assert_eq!(mock.count(Action::Heartbeat), 0);
    }
}
