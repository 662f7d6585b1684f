//! Test doubles shared across the crate's unit tests

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use crate::ocpp::messages::{Action, Call, CallResult, OcppError};
use crate::transport::CallTransport;

/// Records every outbound call and answers with canned responses
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, action: Action) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.action == action)
            .cloned()
            .collect()
    }

    pub fn count(&self, action: Action) -> usize {
        self.calls_of(action).len()
    }
}

#[async_trait::async_trait]
impl CallTransport for MockTransport {
    async fn call(&self, call: Call) -> Result<CallResult, OcppError> {
        let payload = match call.action {
            Action::BootNotification => json!({
                "status": "Accepted",
                "currentTime": Utc::now(),
                "interval": 30,
            }),
            Action::Heartbeat => json!({ "currentTime": Utc::now() }),
            Action::Authorize => json!({ "idTagInfo": { "status": "Accepted" } }),
            Action::StartTransaction => json!({
                "idTagInfo": { "status": "Accepted" },
                "transactionId": 7,
            }),
            Action::StopTransaction => json!({}),
            Action::DataTransfer => json!({ "status": "Accepted" }),
            _ => json!({}),
        };

        self.calls.lock().push(call.clone());

        Ok(CallResult {
            message_id: call.message_id,
            payload,
        })
    }
}
