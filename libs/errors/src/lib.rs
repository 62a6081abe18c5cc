//! Unified error handling for tapgen services
//!
//! Services keep their own domain error enums and convert into [`TapgenError`]
//! at the process boundary. [`TapgenErrorTrait`] gives every error type the same
//! classification surface for logging.

use thiserror::Error;

/// Process-level error shared by every tapgen binary
#[derive(Debug, Error)]
pub enum TapgenError {
    // Configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    // Field devices
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{protocol} protocol error: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Modbus exception from unit {unit_id}: code {code:#04x}")]
    ModbusException { unit_id: u8, code: u8 },

    #[error("Invalid device data: {0}")]
    Data(String),

    // Sinks
    #[error("Sink {sink} failed: {message}")]
    Sink { sink: String, message: String },

    // Process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TapgenResult<T> = Result<T, TapgenError>;

/// Build a [`TapgenError::Configuration`] from a message or format string
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::TapgenError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::TapgenError::Configuration(format!($fmt, $($arg)*))
    };
}

/// Coarse error classes used for log levels and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connection,
    Timeout,
    Protocol,
    Data,
    Sink,
    Internal,
}

/// Classification shared by the process error and every service error
pub trait TapgenErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable code for logs
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Transient failures that a later poll may clear
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Sink
        )
    }

    fn log_level(&self) -> tracing::Level {
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Internal => tracing::Level::ERROR,
            ErrorCategory::Data => tracing::Level::DEBUG,
            _ => tracing::Level::WARN,
        }
    }
}

impl TapgenErrorTrait for TapgenError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::ModbusException { .. } => "MODBUS_EXCEPTION",
            Self::Data(_) => "DATA_ERROR",
            Self::Sink { .. } => "SINK_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::StartupFailed(_) => ErrorCategory::Configuration,
            Self::Connection(_) => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Protocol { .. } | Self::ModbusException { .. } => ErrorCategory::Protocol,
            Self::Data(_) => ErrorCategory::Data,
            Self::Sink { .. } => ErrorCategory::Sink,
            Self::Io(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            TapgenError::Timeout("k24-1".into()).category(),
            ErrorCategory::Timeout
        );
        assert_eq!(
            TapgenError::ModbusException {
                unit_id: 1,
                code: 2
            }
            .category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            TapgenError::Sink {
                sink: "influxdb".into(),
                message: "503".into()
            }
            .category(),
            ErrorCategory::Sink
        );
    }

    #[test]
    fn test_retryable() {
        assert!(TapgenError::Timeout("k24-1".into()).is_retryable());
        assert!(TapgenError::Connection("refused".into()).is_retryable());
        assert!(!TapgenError::Data("short read".into()).is_retryable());
        assert!(!TapgenError::Configuration("no groups".into()).is_retryable());
    }

    #[test]
    fn test_display_and_code() {
        let err = TapgenError::ModbusException {
            unit_id: 3,
            code: 0x02,
        };
        assert_eq!(err.to_string(), "Modbus exception from unit 3: code 0x02");
        assert_eq!(err.error_code(), "MODBUS_EXCEPTION");
        assert_eq!(err.log_level(), tracing::Level::WARN);
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("bad group {}", "site1");
        assert!(matches!(err, TapgenError::Configuration(ref m) if m == "bad group site1"));
        assert_eq!(err.log_level(), tracing::Level::ERROR);
    }
}
