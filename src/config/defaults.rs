//! Built-in defaults (layer 1)

use rpci_protocol::PROTOCOL_RPCI;
use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Protocol number opened by default (RPCI)
    pub protocol: u32,

    /// Force narrow transfers (default: false)
    pub prefer_low_bandwidth: bool,

    /// Log filter directive (default: "warn")
    pub log_filter: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_RPCI,
            prefer_low_bandwidth: false,
            log_filter: "warn".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "channel": {
                "protocol": self.protocol,
                "prefer_low_bandwidth": self.prefer_low_bandwidth,
            },
            "log": {
                "filter": self.log_filter,
            }
        })
    }
}
