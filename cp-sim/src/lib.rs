//! # cp-sim
//!
//! OCPP 1.6 charge point simulator for exercising a central system
//! under test. Simulates one connector: its transaction lifecycle,
//! periodic telemetry, configuration store and the inbound remote
//! command surface.
//!
//! ## Architecture
//!
//! ```text
//! Central System (under test)
//!       │ WebSocket ocpp1.6          │ HTTP JSON envelopes
//!       ▼                            ▼
//! ┌───────────────────────────────────────────────┐
//! │                TransportBinding               │
//! │   ws (persistent)   │   http (bound pair)     │
//! └──────────┬────────────────────────┬───────────┘
//!            │ outbound calls         │ inbound calls
//!            ▼                        ▼
//! ┌────────────────────┐   ┌─────────────────────┐
//! │ CentralSystemProxy │◄──│ RemoteCommandHandler│
//! └──────────┬─────────┘   └──────────┬──────────┘
//!            │                        │
//! ┌──────────┴──────────────┐  ┌──────┴─────────────┐
//! │ TransactionController   │  │ ConfigurationStore │
//! │ (telemetry, heartbeat)  │  │                    │
//! └─────────────────────────┘  └────────────────────┘
//! ```
//!
//! The transport variant is chosen once at startup: a configured bind
//! port selects the discrete request/response pair, its absence the
//! persistent WebSocket.
//!
//! ## Usage
//!
//! ```no_run
//! use cp_sim::{Simulator, SimulatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SimulatorConfig::new(
//!         "ws://localhost:8180/steve/websocket/CentralSystemService",
//!         "CP-SIM-001",
//!     );
//!
//!     let sim = Simulator::connect(config).await?;
//!     sim.boot_notification(false).await?;
//!     sim.start_transaction();
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod handler;
pub mod ocpp;
pub mod proxy;
pub mod simulator;
pub mod store;
pub mod transaction;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SimulatorConfig;
pub use simulator::Simulator;

// Re-export key types
pub use ocpp::{Action, Call, CallResult, OcppError};
pub use ocpp::types::ChargePointStatus;
pub use proxy::CentralSystemProxy;
pub use store::{ConfigurationEntry, ConfigurationStore};
pub use transaction::TransactionController;
pub use transport::{CallTransport, TransportBinding, TransportKind};
