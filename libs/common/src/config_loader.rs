//! Configuration loading helpers
//!
//! Layered loading: YAML file, then environment variables with a service prefix.
//! Nested keys in the environment use a double underscore, e.g.
//! `ACQSRV_MODBUS__TCP__POLL_INTERVAL_MS=5000`.

use std::path::Path;

use errors::{config_error, TapgenResult};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

/// Build the layered figment for a service without extracting it
pub fn layered_figment(path: &Path, env_prefix: &str) -> Figment {
    let mut figment = Figment::new();

    if path.exists() {
        info!("Loading configuration from {}", path.display());
        figment = figment.merge(Yaml::file(path));
    } else {
        warn!(
            "Configuration file {} not found, using environment only",
            path.display()
        );
    }

    figment.merge(Env::prefixed(env_prefix).split("__"))
}

/// Load and deserialize a layered configuration
pub fn load_layered<T>(path: &Path, env_prefix: &str) -> TapgenResult<T>
where
    T: DeserializeOwned,
{
    layered_figment(path, env_prefix)
        .extract()
        .map_err(|e| config_error!("{}: {}", path.display(), e))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use errors::TapgenError;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Inner {
        interval_ms: u64,
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        inner: Inner,
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("svc.yaml", "name: site\ninner:\n  interval_ms: 1000\n")?;
            jail.set_env("TESTSVC_INNER__INTERVAL_MS", "250");

            let cfg: Sample = load_layered(Path::new("svc.yaml"), "TESTSVC_").unwrap();
            assert_eq!(cfg.name, "site");
            assert_eq!(cfg.inner.interval_ms, 250);
            Ok(())
        });
    }

    #[test]
    fn test_missing_field_is_configuration_error() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("svc.yaml", "name: site\n")?;

            let err = load_layered::<Sample>(Path::new("svc.yaml"), "TESTSVC_").unwrap_err();
            assert!(matches!(err, TapgenError::Configuration(_)));
            Ok(())
        });
    }
}
