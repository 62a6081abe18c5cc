//! Error handling for the acquisition service
//!
//! Transport and sink failures are returned as [`AcqSrvError`]; the health manager
//! and device reader turn them into outcomes so nothing propagates past a device task.

use errors::{ErrorCategory, TapgenError, TapgenErrorTrait};
use thiserror::Error;

/// Acquisition service error type
#[derive(Error, Debug, Clone)]
pub enum AcqSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Malformed or unexpected frames
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Exception response returned by the device
    #[error("Modbus exception from unit {unit_id}: function {function:#04x}, code {code:#04x}")]
    ModbusException { unit_id: u8, function: u8, code: u8 },

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Data handling errors (short responses, bad windows)
    #[error("Data error: {0}")]
    DataError(String),

    /// Storage or export sink failures
    #[error("Sink error: {sink}: {message}")]
    SinkError { sink: String, message: String },

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, AcqSrvError>;

impl AcqSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        AcqSrvError::ConfigError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        AcqSrvError::ConnectionError(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        AcqSrvError::ProtocolError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AcqSrvError::TimeoutError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        AcqSrvError::DataError(msg.into())
    }

    pub fn sink(sink: impl Into<String>, msg: impl Into<String>) -> Self {
        AcqSrvError::SinkError {
            sink: sink.into(),
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AcqSrvError::InternalError(msg.into())
    }

    pub fn not_connected() -> Self {
        AcqSrvError::ConnectionError("Not connected".to_string())
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for AcqSrvError {
    fn from(err: std::io::Error) -> Self {
        AcqSrvError::IoError(err.to_string())
    }
}

impl From<csv::Error> for AcqSrvError {
    fn from(err: csv::Error) -> Self {
        AcqSrvError::sink("csv", err.to_string())
    }
}

impl From<reqwest::Error> for AcqSrvError {
    fn from(err: reqwest::Error) -> Self {
        AcqSrvError::sink("influxdb", err.to_string())
    }
}

impl From<figment::Error> for AcqSrvError {
    fn from(err: figment::Error) -> Self {
        AcqSrvError::ConfigError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AcqSrvError {
    fn from(err: tokio::task::JoinError) -> Self {
        AcqSrvError::InternalError(format!("Task failed: {err}"))
    }
}

// ============================================================================
// Conversion to TapgenError at the process boundary
// ============================================================================

impl From<AcqSrvError> for TapgenError {
    fn from(err: AcqSrvError) -> Self {
        match err {
            AcqSrvError::ConfigError(msg) => TapgenError::Configuration(msg),
            AcqSrvError::ConnectionError(msg) => TapgenError::Connection(msg),
            AcqSrvError::ProtocolError(msg) => TapgenError::Protocol {
                protocol: "modbus".to_string(),
                message: msg,
            },
            AcqSrvError::ModbusException { unit_id, code, .. } => {
                TapgenError::ModbusException { unit_id, code }
            },
            AcqSrvError::TimeoutError(msg) => TapgenError::Timeout(msg),
            AcqSrvError::DataError(msg) => TapgenError::Data(msg),
            AcqSrvError::SinkError { sink, message } => TapgenError::Sink { sink, message },
            AcqSrvError::IoError(msg) => TapgenError::Io(std::io::Error::other(msg)),
            AcqSrvError::InternalError(msg) => TapgenError::Internal(msg),
        }
    }
}

impl TapgenErrorTrait for AcqSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => "ACQSRV_CONFIG_ERROR",
            Self::ConnectionError(_) => "ACQSRV_CONNECTION_ERROR",
            Self::ProtocolError(_) => "ACQSRV_PROTOCOL_ERROR",
            Self::ModbusException { .. } => "ACQSRV_MODBUS_EXCEPTION",
            Self::TimeoutError(_) => "ACQSRV_TIMEOUT",
            Self::DataError(_) => "ACQSRV_DATA_ERROR",
            Self::SinkError { .. } => "ACQSRV_SINK_ERROR",
            Self::IoError(_) => "ACQSRV_IO_ERROR",
            Self::InternalError(_) => "ACQSRV_INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::ProtocolError(_) | Self::ModbusException { .. } => ErrorCategory::Protocol,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::DataError(_) => ErrorCategory::Data,
            Self::SinkError { .. } => ErrorCategory::Sink,
            Self::IoError(_) | Self::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Failures a fresh connection may clear. A device exception is an answer, not a fault.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_)
                | Self::TimeoutError(_)
                | Self::ProtocolError(_)
                | Self::IoError(_)
                | Self::SinkError { .. }
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_exception_display() {
        let err = AcqSrvError::ModbusException {
            unit_id: 1,
            function: 0x83,
            code: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Modbus exception from unit 1: function 0x83, code 0x02"
        );
        assert_eq!(err.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn test_into_tapgen_error() {
        let err: TapgenError = AcqSrvError::timeout("k24-1").into();
        assert!(matches!(err, TapgenError::Timeout(ref m) if m == "k24-1"));

        let err: TapgenError = AcqSrvError::sink("csv", "disk full").into();
        assert!(matches!(err, TapgenError::Sink { ref sink, .. } if sink == "csv"));
    }

    #[test]
    fn test_retryable() {
        assert!(AcqSrvError::not_connected().is_retryable());
        assert!(AcqSrvError::timeout("x").is_retryable());
        assert!(!AcqSrvError::config("x").is_retryable());
        // Garbled frame: reconnect and try again
        assert!(AcqSrvError::protocol("transaction id mismatch").is_retryable());
        assert!(!AcqSrvError::ModbusException {
            unit_id: 1,
            function: 0x83,
            code: 0x02
        }
        .is_retryable());
        assert!(!AcqSrvError::data("short").is_retryable());
    }

    #[test]
    fn test_failure_log_levels() {
        assert_eq!(AcqSrvError::timeout("x").log_level(), tracing::Level::WARN);
        assert_eq!(AcqSrvError::data("x").log_level(), tracing::Level::DEBUG);
        assert_eq!(AcqSrvError::internal("x").log_level(), tracing::Level::ERROR);
    }
}
