//! Platform to log file mapping
//!
//! rsyslog writes forwarded messages to a distribution-specific file. The
//! receiver's platform description (from `lsb_release`) is matched against
//! an ordered rule table; the first matching rule wins and anything
//! unrecognised falls back to the default path.

use serde::{Deserialize, Serialize};

/// Log file used when no rule matches
pub const DEFAULT_LOG_PATH: &str = "/var/log/messages";

/// One classification rule
///
/// Matches when the lower-cased platform description contains `family`
/// and, if given, `version` somewhere after it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogPathRule {
    pub family: String,
    #[serde(default)]
    pub version: Option<String>,
    pub path: String,
}

impl LogPathRule {
    pub fn new(family: &str, version: Option<&str>, path: &str) -> Self {
        Self {
            family: family.to_string(),
            version: version.map(str::to_string),
            path: path.to_string(),
        }
    }

    pub fn matches(&self, platform: &str) -> bool {
        let platform = platform.to_lowercase();
        let family = self.family.to_lowercase();
        let Some(start) = platform.find(&family) else {
            return false;
        };
        match &self.version {
            Some(version) => platform[start + family.len()..].contains(&version.to_lowercase()),
            None => true,
        }
    }
}

/// Ordered rule table with a default
#[derive(Debug, Clone)]
pub struct LogPathTable {
    rules: Vec<LogPathRule>,
    default_path: String,
}

impl Default for LogPathTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LogPathTable {
    /// Known conventions: Ubuntu 12 logs to syslog, others to messages
    pub fn builtin() -> Self {
        Self {
            rules: vec![LogPathRule::new("ubuntu", Some("12"), "/var/log/syslog")],
            default_path: DEFAULT_LOG_PATH.to_string(),
        }
    }

    /// Builtin table with `extra` rules checked first
    pub fn with_rules(extra: &[LogPathRule]) -> Self {
        let mut table = Self::builtin();
        let mut rules = extra.to_vec();
        rules.append(&mut table.rules);
        table.rules = rules;
        table
    }

    /// Log file for a platform description
    pub fn select(&self, platform: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.matches(platform))
            .map(|rule| rule.path.as_str())
            .unwrap_or(&self.default_path)
    }
}
