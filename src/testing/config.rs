//! Scenario definitions
//!
//! Scenarios are normally the builtin three, but a YAML file can register
//! its own list:
//!
//! ```yaml
//! - name: smoke_test
//!   description: Plain UDP forwarding
//!   transport: udp
//! - name: relp
//!   transport: relp
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::common::{Error, Result};
use crate::verifier::Transport;

/// One named scenario: a verifier run over a single transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub transport: Transport,
}

impl ScenarioSpec {
    pub fn new(name: impl Into<String>, transport: Transport) -> Self {
        Self {
            name: name.into(),
            description: None,
            transport,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The builtin scenarios, one per transport
pub fn builtin_scenarios() -> Vec<ScenarioSpec> {
    vec![
        ScenarioSpec::new("smoke_test", Transport::Udp)
            .with_description("Forward over plain UDP syslog"),
        ScenarioSpec::new("relp", Transport::Relp).with_description("Forward over RELP"),
        ScenarioSpec::new("relp-secured", Transport::RelpSecured)
            .with_description("Forward over RELP wrapped in TLS"),
    ]
}

/// Load a scenario list from a YAML file
pub fn load_scenarios(path: &Path) -> Result<Vec<ScenarioSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read scenario file '{}': {}",
            path.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse scenario file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_scenarios_cover_every_transport() {
        let scenarios = builtin_scenarios();
        let transports: Vec<Transport> = scenarios.iter().map(|s| s.transport).collect();
        assert_eq!(transports, Transport::ALL.to_vec());
        assert_eq!(scenarios[0].name, "smoke_test");
    }

    #[test]
    fn test_load_scenarios() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "- name: plain\n  transport: udp\n- name: secured\n  description: tls\n  transport: relp-secured"
        )
        .unwrap();

        let scenarios = load_scenarios(file.path()).unwrap();
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0], ScenarioSpec::new("plain", Transport::Udp));
        assert_eq!(scenarios[1].transport, Transport::RelpSecured);
        assert_eq!(scenarios[1].description.as_deref(), Some("tls"));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "- name: bad\n  transport: carrier-pigeon").unwrap();
        assert!(matches!(load_scenarios(file.path()), Err(Error::Config(_))));
    }
}
