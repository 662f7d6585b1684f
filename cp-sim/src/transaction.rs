//! Transaction lifecycle and telemetry
//!
//! One controller per simulated connector. The phase transition
//! `Idle -> PendingStart -> Active -> PendingStop -> Idle` is guarded by
//! a mutex so a check-and-set is atomic against concurrent start/stop
//! attempts: two racing starts, or a start racing a stop, can never both
//! succeed. Start/stop effects (the actual StartTransaction and
//! StopTransaction calls) run deferred on their own tasks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::SimulatorConfig;
use crate::ocpp::messages::OcppError;
use crate::proxy::{CentralSystemProxy, MeterSample};

/// Energy added per telemetry tick, Wh. Illustrative noise, not a
/// calibrated consumption model.
const ENERGY_STEPS_WH: [i32; 4] = [200, 300, 400, 500];

/// Reported state of charge, fixed
const SOC_PERCENT: i32 = 50;

/// Transaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PendingStart,
    Active,
    PendingStop,
}

struct TxState {
    phase: Phase,
    transaction_id: Option<i32>,
    energy_wh: i32,
    telemetry: Option<JoinHandle<()>>,
}

/// The transaction/telemetry state machine
pub struct TransactionController {
    proxy: Arc<CentralSystemProxy>,
    start_delay: Duration,
    stop_delay: Duration,
    immediate_delay: Duration,
    telemetry_interval: Duration,
    state: Arc<Mutex<TxState>>,
}

impl TransactionController {
    pub fn new(proxy: Arc<CentralSystemProxy>, config: &SimulatorConfig) -> Self {
        Self {
            proxy,
            start_delay: config.start_delay,
            stop_delay: config.stop_delay,
            immediate_delay: config.immediate_delay,
            telemetry_interval: config.telemetry_interval,
            state: Arc::new(Mutex::new(TxState {
                phase: Phase::Idle,
                transaction_id: None,
                energy_wh: 0,
                telemetry: None,
            })),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Accepted energy accumulated so far, Wh
    pub fn energy_wh(&self) -> i32 {
        self.state.lock().energy_wh
    }

    /// Schedule a StartTransaction.
    ///
    /// Rejected (`false`, no side effect) unless idle. Otherwise the
    /// call is accepted immediately and the outbound StartTransaction
    /// fires after the configured start delay (`use_configured_delay`)
    /// or the fixed short delay. On response the returned transaction id
    /// is recorded, the energy accumulator resets to zero and the
    /// telemetry loop begins.
    pub fn start(&self, connector_id: i32, id_tag: &str, use_configured_delay: bool) -> bool {
        {
            let mut st = self.state.lock();
            if st.phase != Phase::Idle {
                debug!("Rejecting start, phase is {:?}", st.phase);
                return false;
            }
            st.phase = Phase::PendingStart;
        }

        let delay = if use_configured_delay {
            self.start_delay
        } else {
            self.immediate_delay
        };

        info!("Transaction start scheduled in {:?}", delay);

        let proxy = self.proxy.clone();
        let state = self.state.clone();
        let id_tag = id_tag.to_string();
        let telemetry_interval = self.telemetry_interval;

        tokio::spawn(async move {
            sleep(delay).await;

            match proxy.start_transaction(connector_id, &id_tag, 0).await {
                Ok(resp) => {
                    let telemetry = tokio::spawn(telemetry_loop(
                        proxy.clone(),
                        state.clone(),
                        telemetry_interval,
                        connector_id,
                        resp.transaction_id,
                    ));

                    let mut st = state.lock();
                    st.transaction_id = Some(resp.transaction_id);
                    st.energy_wh = 0;
                    st.telemetry = Some(telemetry);
                    st.phase = Phase::Active;
                    info!("Transaction {} active", resp.transaction_id);
                }
                Err(e) => {
                    warn!("StartTransaction failed: {}", e);
                    state.lock().phase = Phase::Idle;
                }
            }
        });

        true
    }

    /// Schedule a StopTransaction.
    ///
    /// Rejected (`false`) unless a transaction is active. The telemetry
    /// loop is cancelled immediately and the accumulated energy captured
    /// at that moment becomes the final meter reading, even though the
    /// outbound StopTransaction itself fires after the configured stop
    /// delay (`use_configured_delay`) or right away.
    pub fn stop(&self, use_configured_delay: bool) -> bool {
        let (transaction_id, final_energy) = {
            let mut st = self.state.lock();
            if st.phase != Phase::Active {
                debug!("Rejecting stop, phase is {:?}", st.phase);
                return false;
            }
            if let Some(handle) = st.telemetry.take() {
                handle.abort();
            }
            st.phase = Phase::PendingStop;
            (st.transaction_id.unwrap_or(0), st.energy_wh)
        };

        let delay = if use_configured_delay {
            self.stop_delay
        } else {
            Duration::ZERO
        };

        info!(
            "Transaction stop scheduled in {:?}, final reading {} Wh",
            delay, final_energy
        );

        let proxy = self.proxy.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            sleep(delay).await;

            if let Err(e) = proxy.stop_transaction(transaction_id, final_energy).await {
                warn!("StopTransaction failed: {}", e);
            } else {
                info!("Transaction {} stopped", transaction_id);
            }

            let mut st = state.lock();
            st.transaction_id = None;
            st.phase = Phase::Idle;
        });

        true
    }

    /// One immediate MeterValues from the current accumulator,
    /// independent of the telemetry loop (serves TriggerMessage)
    pub async fn emit_meter_values_now(&self, connector_id: i32) -> Result<(), OcppError> {
        let (energy_wh, transaction_id) = {
            let st = self.state.lock();
            (st.energy_wh, st.transaction_id)
        };
        let sample = synth_sample(energy_wh);
        self.proxy
            .meter_values(connector_id, transaction_id, sample)
            .await
    }
}

/// Build one sample around the current energy register
fn synth_sample(energy_wh: i32) -> MeterSample {
    let mut rng = rand::thread_rng();
    MeterSample {
        energy_wh,
        soc_percent: SOC_PERCENT,
        power_w: rng.gen_range(6000.0..7400.0),
        current_a: rng.gen_range(13.0..16.0),
    }
}

/// Periodic telemetry: accumulate a random energy step, report the
/// register. Runs until aborted by `stop`.
async fn telemetry_loop(
    proxy: Arc<CentralSystemProxy>,
    state: Arc<Mutex<TxState>>,
    interval: Duration,
    connector_id: i32,
    transaction_id: i32,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);

    loop {
        ticker.tick().await;

        let sample = {
            let step = {
                let mut rng = rand::thread_rng();
                ENERGY_STEPS_WH[rng.gen_range(0..ENERGY_STEPS_WH.len())]
            };
            let mut st = state.lock();
            st.energy_wh += step;
            synth_sample(st.energy_wh)
        };

        debug!(
            "Telemetry tick: {} Wh on transaction {}",
            sample.energy_wh, transaction_id
        );

        if let Err(e) = proxy
            .meter_values(connector_id, Some(transaction_id), sample)
            .await
        {
            warn!("MeterValues failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::messages::Action;
    use crate::testutil::MockTransport;

    fn setup() -> (Arc<MockTransport>, TransactionController) {
        let config = SimulatorConfig::default()
            .with_delays(Duration::from_secs(2), Duration::from_secs(2))
            .with_telemetry_interval(Duration::from_secs(5));
        let mock = MockTransport::new();
        let proxy = Arc::new(CentralSystemProxy::new(mock.clone(), &config));
        let controller = TransactionController::new(proxy, &config);
        (mock, controller)
    }

    fn energy_register(call: &crate::ocpp::messages::Call) -> i32 {
        call.payload["meterValue"][0]["sampledValue"][0]["value"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let (mock, controller) = setup();

        assert!(controller.start(1, "TAG", false));
        assert!(!controller.start(1, "TAG", false));

        // Past the fixed short delay: the first start is now active,
        // a third attempt is still rejected.
        sleep(Duration::from_millis(600)).await;
        assert_eq!(controller.phase(), Phase::Active);
        assert!(!controller.start(1, "TAG", false));

        assert_eq!(mock.count(Action::StartTransaction), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_rejected() {
        let (mock, controller) = setup();

        assert!(!controller.stop(false));
        sleep(Duration::from_secs(1)).await;

        assert_eq!(mock.count(Action::StopTransaction), 0);
        assert_eq!(controller.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_delay_defers_start() {
        let (mock, controller) = setup();

        assert!(controller.start(1, "TAG", true));

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(mock.count(Action::StartTransaction), 0);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(mock.count(Action::StartTransaction), 1);
        assert_eq!(controller.phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_monotonic() {
        let (mock, controller) = setup();

        assert!(controller.start(1, "TAG", false));
        sleep(Duration::from_millis(600)).await;

        // Three 5 s intervals of active time
        sleep(Duration::from_millis(15_200)).await;

        let meter_calls = mock.calls_of(Action::MeterValues);
        assert_eq!(meter_calls.len(), 3);

        let energies: Vec<i32> = meter_calls.iter().map(energy_register).collect();
        for pair in energies.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        for (i, e) in energies.iter().enumerate() {
            let ticks = (i + 1) as i32;
            assert!(*e >= 200 * ticks && *e <= 500 * ticks);
        }

        // The register carries the transaction id handed out by the
        // central system
        assert_eq!(meter_calls[0].payload["transactionId"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_energy_at_cancellation() {
        let (mock, controller) = setup();

        assert!(controller.start(1, "TAG", false));
        sleep(Duration::from_millis(600)).await;
        sleep(Duration::from_millis(10_200)).await; // two ticks

        let last_reported = energy_register(&mock.calls_of(Action::MeterValues)[1]);
        let accumulated = controller.energy_wh();
        assert_eq!(accumulated, last_reported);

        // Configured stop delay: telemetry stops now, the outbound call
        // is deferred, and no further ticks accumulate in between.
        assert!(controller.stop(true));
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(mock.count(Action::StopTransaction), 0);
        assert_eq!(mock.count(Action::MeterValues), 2);

        sleep(Duration::from_millis(600)).await;
        let stops = mock.calls_of(Action::StopTransaction);
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0].payload["meterStop"], last_reported);
        assert_eq!(stops[0].payload["transactionId"], 7);

        // Back to idle, a new start is accepted
        assert_eq!(controller.phase(), Phase::Idle);
        assert!(controller.start(1, "TAG", false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_racing_stop() {
        let (_, controller) = setup();

        assert!(controller.start(1, "TAG", false));
        // Start is still pending, so stop must lose the race outright
        assert!(!controller.stop(false));

        sleep(Duration::from_millis(600)).await;
        assert!(controller.stop(false));
        assert!(!controller.stop(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_now_outside_transaction() {
        let (mock, controller) = setup();

        controller.emit_meter_values_now(1).await.unwrap();

        let calls = mock.calls_of(Action::MeterValues);
        assert_eq!(calls.len(), 1);
        assert_eq!(energy_register(&calls[0]), 0);
        assert!(calls[0].payload.get("transactionId").is_none());
    }
}
