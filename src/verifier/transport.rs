//! Log forwarding protocols under test

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::Error;

/// Protocol the client uses to forward its logs
///
/// Only decides the value of the `logging/protocol` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transport {
    /// Plain syslog over UDP
    #[serde(rename = "udp")]
    Udp,
    /// Reliable Event Logging Protocol
    #[serde(rename = "relp")]
    Relp,
    /// RELP wrapped in TLS
    #[serde(rename = "relp-secured")]
    RelpSecured,
}

impl Transport {
    pub const ALL: [Transport; 3] = [Transport::Udp, Transport::Relp, Transport::RelpSecured];

    /// Value written into the protocol input
    pub fn as_input_value(self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Relp => "relp",
            Transport::RelpSecured => "relp-secured",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_input_value())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Transport::ALL
            .into_iter()
            .find(|t| t.as_input_value().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Unknown transport '{}'. Supported: udp, relp, relp-secured",
                    s
                ))
            })
    }
}
