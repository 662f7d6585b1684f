//! Central system proxy
//!
//! Typed facade over the selected transport: each method builds one
//! outbound call, sends it, and parses the typed response. This is the
//! only surface the simulator core uses to talk to the central system.

use std::sync::Arc;

use chrono::Utc;

use crate::config::SimulatorConfig;
use crate::ocpp::messages::{Action, Call, OcppError};
use crate::ocpp::types::*;
use crate::transport::CallTransport;

/// One telemetry sample handed to [`CentralSystemProxy::meter_values`]
#[derive(Debug, Clone, Copy)]
pub struct MeterSample {
    /// Cumulative energy register, Wh
    pub energy_wh: i32,
    /// State of charge, percent
    pub soc_percent: i32,
    /// Instantaneous power, W
    pub power_w: f64,
    /// Single-phase current, A
    pub current_a: f64,
}

/// The outbound call surface
pub struct CentralSystemProxy {
    transport: Arc<dyn CallTransport>,
    vendor: String,
    model: String,
    serial_number: Option<String>,
    firmware_version: Option<String>,
}

impl CentralSystemProxy {
    pub fn new(transport: Arc<dyn CallTransport>, config: &SimulatorConfig) -> Self {
        Self {
            transport,
            vendor: config.vendor.clone(),
            model: config.model.clone(),
            serial_number: config.serial_number.clone(),
            firmware_version: config.firmware_version.clone(),
        }
    }

    async fn send<Req, Resp>(&self, action: Action, request: Req) -> Result<Resp, OcppError>
    where
        Req: serde::Serialize,
        Resp: for<'de> serde::Deserialize<'de>,
    {
        let call = Call::new(action, request)?;
        let result = self.transport.call(call).await?;
        result.parse_payload()
    }

    /// BootNotification; `with_details` fills the optional vendor fields
    pub async fn boot_notification(
        &self,
        with_details: bool,
    ) -> Result<BootNotificationResponse, OcppError> {
        let request = BootNotificationRequest {
            charge_point_vendor: self.vendor.clone(),
            charge_point_model: self.model.clone(),
            charge_point_serial_number: if with_details {
                self.serial_number.clone()
            } else {
                None
            },
            charge_box_serial_number: None,
            firmware_version: if with_details {
                self.firmware_version.clone()
            } else {
                None
            },
            iccid: None,
            imsi: None,
            meter_type: if with_details {
                Some("Simulated".to_string())
            } else {
                None
            },
            meter_serial_number: None,
        };
        self.send(Action::BootNotification, request).await
    }

    pub async fn heartbeat(&self) -> Result<HeartbeatResponse, OcppError> {
        self.send(Action::Heartbeat, HeartbeatRequest {}).await
    }

    pub async fn status_notification(
        &self,
        connector_id: i32,
        status: ChargePointStatus,
    ) -> Result<(), OcppError> {
        let request = StatusNotificationRequest {
            connector_id,
            error_code: ChargePointErrorCode::NoError,
            status,
            timestamp: Some(Utc::now()),
            info: None,
        };
        let _: StatusNotificationResponse = self.send(Action::StatusNotification, request).await?;
        Ok(())
    }

    pub async fn authorize(&self, id_tag: &str) -> Result<AuthorizeResponse, OcppError> {
        let request = AuthorizeRequest {
            id_tag: id_tag.to_string(),
        };
        self.send(Action::Authorize, request).await
    }

    pub async fn start_transaction(
        &self,
        connector_id: i32,
        id_tag: &str,
        meter_start: i32,
    ) -> Result<StartTransactionResponse, OcppError> {
        let request = StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            timestamp: Utc::now(),
            reservation_id: None,
        };
        self.send(Action::StartTransaction, request).await
    }

    pub async fn stop_transaction(
        &self,
        transaction_id: i32,
        meter_stop: i32,
    ) -> Result<StopTransactionResponse, OcppError> {
        let request = StopTransactionRequest {
            transaction_id,
            meter_stop,
            timestamp: Utc::now(),
            id_tag: None,
            reason: None,
        };
        self.send(Action::StopTransaction, request).await
    }

    pub async fn meter_values(
        &self,
        connector_id: i32,
        transaction_id: Option<i32>,
        sample: MeterSample,
    ) -> Result<(), OcppError> {
        let request = MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: vec![MeterValue {
                timestamp: Utc::now(),
                sampled_value: vec![
                    SampledValue {
                        value: sample.energy_wh.to_string(),
                        context: Some(ReadingContext::SamplePeriodic),
                        measurand: Some(Measurand::EnergyActiveImportRegister),
                        phase: None,
                        unit: Some(UnitOfMeasure::Wh),
                    },
                    SampledValue {
                        value: sample.soc_percent.to_string(),
                        context: Some(ReadingContext::SamplePeriodic),
                        measurand: Some(Measurand::SoC),
                        phase: None,
                        unit: Some(UnitOfMeasure::Percent),
                    },
                    SampledValue {
                        value: format!("{:.1}", sample.power_w),
                        context: Some(ReadingContext::SamplePeriodic),
                        measurand: Some(Measurand::PowerActiveImport),
                        phase: None,
                        unit: Some(UnitOfMeasure::W),
                    },
                    SampledValue {
                        value: format!("{:.1}", sample.current_a),
                        context: Some(ReadingContext::SamplePeriodic),
                        measurand: Some(Measurand::CurrentImport),
                        phase: Some("L1".to_string()),
                        unit: Some(UnitOfMeasure::A),
                    },
                ],
            }],
        };
        let _: MeterValuesResponse = self.send(Action::MeterValues, request).await?;
        Ok(())
    }

    pub async fn data_transfer(
        &self,
        vendor_id: &str,
        message_id: Option<&str>,
        data: Option<&str>,
    ) -> Result<DataTransferResponse, OcppError> {
        let request = DataTransferRequest {
            vendor_id: vendor_id.to_string(),
            message_id: message_id.map(str::to_string),
            data: data.map(str::to_string),
        };
        self.send(Action::DataTransfer, request).await
    }
}
