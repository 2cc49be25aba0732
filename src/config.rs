//! Configuration management

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

pub use crate::mtls::config::{MtlsConfig, RevocationConfig, RevocationMode, StringList};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Client certificate policy and trust bundle
    pub mtls: MtlsConfig,
    /// Revocation checking
    pub revocation: RevocationConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Environment variables use the `MTLS_GATE_` prefix and `__` as the
    /// nesting separator, e.g. `MTLS_GATE_MTLS__ISSUER_NAME`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MTLS_GATE_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/mtls-gate.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "mtls:\n  issuer_name: Test CA\n  ca_bundle_path: /etc/ca.pem\n  allowed_eku_oids: 1.3.6.1.5.5.7.3.2\nrevocation:\n  mode: offline\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.mtls.issuer_name, "Test CA");
        assert_eq!(config.mtls.ca_bundle_path, "/etc/ca.pem");
        assert_eq!(
            config.mtls.allowed_eku_oids.unwrap().items(),
            ["1.3.6.1.5.5.7.3.2"]
        );
        assert_eq!(config.revocation.mode, RevocationMode::Offline);
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "revocation:\n  mode: sometimes\n").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(Error::Config(_))
        ));
    }
}
