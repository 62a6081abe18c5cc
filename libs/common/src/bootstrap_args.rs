//! Command-line arguments shared by tapgen services

#[cfg(feature = "cli")]
use clap::Parser;
use std::path::PathBuf;

/// Verbosity accepted by `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[cfg_attr(feature = "cli", value(alias = "warning"))]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// Name used in `EnvFilter` directives
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", clap(author, version, about))]
pub struct ServiceArgs {
    /// YAML configuration file
    #[cfg_attr(
        feature = "cli",
        clap(short = 'c', long, default_value = "config/acqsrv.yaml")
    )]
    pub config: PathBuf,

    #[cfg_attr(
        feature = "cli",
        clap(short = 'l', long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)
    )]
    pub log_level: LogLevel,

    /// Load and validate the configuration, print a summary and exit
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,

    /// Run a single polling cycle and exit
    #[cfg_attr(feature = "cli", clap(long, conflicts_with = "validate"))]
    pub once: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config/acqsrv.yaml"),
            log_level: LogLevel::default(),
            validate: false,
            once: false,
        }
    }
}

impl ServiceArgs {
    pub fn level(&self) -> tracing::Level {
        self.log_level.as_level()
    }

    pub fn level_directive(&self) -> &'static str {
        self.log_level.directive()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.config, PathBuf::from("config/acqsrv.yaml"));
        assert_eq!(args.level(), tracing::Level::INFO);
        assert_eq!(args.level_directive(), "info");
        assert!(!args.once);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_cli_parse() {
        let args =
            ServiceArgs::try_parse_from(["acqsrv", "--config", "site.yaml", "--once", "-l", "DEBUG"])
                .unwrap();
        assert_eq!(args.config, PathBuf::from("site.yaml"));
        assert!(args.once);
        assert_eq!(args.level_directive(), "debug");

        let args = ServiceArgs::try_parse_from(["acqsrv", "-l", "warning"]).unwrap();
        assert_eq!(args.log_level, LogLevel::Warn);
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_cli_rejects_conflicts() {
        assert!(ServiceArgs::try_parse_from(["acqsrv", "--once", "--validate"]).is_err());
        assert!(ServiceArgs::try_parse_from(["acqsrv", "-l", "loud"]).is_err());
    }
}
