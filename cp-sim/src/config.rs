//! Simulator configuration
//!
//! Merged once from defaults and caller overrides at startup and never
//! changed afterwards. The presence of a bind port selects the
//! request/response transport; its absence selects the persistent
//! WebSocket transport.

use std::time::Duration;

/// Complete simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Central system endpoint (ws:// for the persistent transport,
    /// http:// for the request/response transport)
    pub central_url: String,

    /// Charge point identity (appended to the WebSocket URL path,
    /// carried in request/response envelopes)
    pub charge_point_id: String,

    /// Local port for the inbound listener. Setting this selects the
    /// request/response transport.
    pub bind_port: Option<u16>,

    /// Host advertised in the callback address of outbound envelopes.
    /// The listener binds the wildcard address, which a remote central
    /// system cannot route back to, so the advertised host must be one
    /// it can actually reach.
    pub callback_host: String,

    /// Vendor name for BootNotification
    pub vendor: String,

    /// Model name for BootNotification
    pub model: String,

    /// Serial number (optional)
    pub serial_number: Option<String>,

    /// Firmware version (optional)
    pub firmware_version: Option<String>,

    /// The single simulated connector
    pub connector_id: i32,

    /// Default authorization tag for operator-triggered transactions
    pub id_tag: String,

    /// Heartbeat period; zero disables the scheduler
    pub heartbeat_interval: Duration,

    /// Delay before the deferred StartTransaction when the configured
    /// delay is requested (server-triggered starts)
    pub start_delay: Duration,

    /// Delay before the deferred StopTransaction when the configured
    /// delay is requested
    pub stop_delay: Duration,

    /// Fixed short delay used for operator-triggered starts
    pub immediate_delay: Duration,

    /// Keepalive ping period on the persistent transport
    pub keepalive_timeout: Duration,

    /// Period of the telemetry loop while a transaction is active
    pub telemetry_interval: Duration,

    /// Initial reconnect delay (persistent transport)
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,

    /// Timeout for a single outbound call round trip
    pub request_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            central_url: "ws://localhost:8180/steve/websocket/CentralSystemService".to_string(),
            charge_point_id: "CP-SIM-001".to_string(),
            bind_port: None,
            callback_host: "localhost".to_string(),
            vendor: "cp-sim".to_string(),
            model: "CP-SIM".to_string(),
            serial_number: None,
            firmware_version: Some("0.1.0".to_string()),
            connector_id: 1,
            id_tag: "DEADBEEF".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            start_delay: Duration::from_secs(5),
            stop_delay: Duration::from_secs(5),
            immediate_delay: Duration::from_millis(500),
            keepalive_timeout: Duration::from_secs(60),
            telemetry_interval: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SimulatorConfig {
    /// Create a config with the mandatory parameters
    pub fn new(central_url: impl Into<String>, charge_point_id: impl Into<String>) -> Self {
        Self {
            central_url: central_url.into(),
            charge_point_id: charge_point_id.into(),
            ..Default::default()
        }
    }

    /// Select the request/response transport by binding an inbound port
    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = Some(port);
        self
    }

    /// Set the host advertised in callback addresses
    pub fn with_callback_host(mut self, host: impl Into<String>) -> Self {
        self.callback_host = host.into();
        self
    }

    /// Set vendor info
    pub fn with_vendor(mut self, vendor: impl Into<String>, model: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self.model = model.into();
        self
    }

    /// Set serial number
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    /// Set the simulated connector id
    pub fn with_connector(mut self, connector_id: i32) -> Self {
        self.connector_id = connector_id;
        self
    }

    /// Set the default authorization tag
    pub fn with_id_tag(mut self, id_tag: impl Into<String>) -> Self {
        self.id_tag = id_tag.into();
        self
    }

    /// Set the heartbeat period (zero disables heartbeats)
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the telemetry period
    pub fn with_telemetry_interval(mut self, interval: Duration) -> Self {
        self.telemetry_interval = interval;
        self
    }

    /// Set the deferred start/stop delays
    pub fn with_delays(mut self, start: Duration, stop: Duration) -> Self {
        self.start_delay = start;
        self.stop_delay = stop;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = SimulatorConfig::new("ws://localhost:8180/ocpp", "CP001")
            .with_vendor("acme", "AC-1")
            .with_serial("SN001")
            .with_connector(2)
            .with_id_tag("CAFE01")
            .with_telemetry_interval(Duration::from_secs(5));

        assert_eq!(config.charge_point_id, "CP001");
        assert_eq!(config.vendor, "acme");
        assert_eq!(config.connector_id, 2);
        assert_eq!(config.id_tag, "CAFE01");
        assert_eq!(config.telemetry_interval, Duration::from_secs(5));
        assert!(config.bind_port.is_none());
    }

    #[test]
    fn test_bind_port_selects_request_response() {
        let config = SimulatorConfig::new("http://localhost:8080/ocpp", "CP001")
            .with_bind_port(12801);
        assert_eq!(config.bind_port, Some(12801));
        assert_eq!(config.callback_host, "localhost");
    }

    #[test]
    fn test_callback_host_override() {
        let config = SimulatorConfig::new("http://localhost:8080/ocpp", "CP001")
            .with_bind_port(12801)
            .with_callback_host("203.0.113.7");
        assert_eq!(config.callback_host, "203.0.113.7");
    }
}
