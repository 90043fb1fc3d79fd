//! MogileFS tracker protocol, host-driven: no I/O.
//! The host owns sockets and files; this crate encodes commands, decodes
//! responses, tracks tracker liveness and keeps the transaction log.

pub mod fields;
pub mod protocol;
pub mod tracker;
pub mod transaction;

pub use fields::FieldError;
pub use protocol::{
    decode_response, encode_command, verb, Command, Fields, LineEncoding, ProtocolError, Response,
};
pub use tracker::{AddrParseError, Tracker, TrackerAddr, TrackerRegistry};
pub use transaction::{
    compensation, Compensation, LogEntry, TransactionError, TransactionLog, TransactionState,
};
