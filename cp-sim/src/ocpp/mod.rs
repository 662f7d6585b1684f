//! OCPP 1.6 protocol support
//!
//! - `messages`: OCPP-J wire framing (CALL / CALLRESULT / CALLERROR)
//! - `types`: request/response payload types

pub mod messages;
pub mod types;

pub use messages::{
    Action, Call, CallError, CallResult, ErrorCode, MessageType, OcppError, OcppMessage,
};
pub use types::*;
