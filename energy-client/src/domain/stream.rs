use std::fmt;

use serde::{Deserialize, Serialize};

use super::CorrelationKey;

/// The two correlated device families reporting telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Meter,
    Vehicle,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Meter, StreamKind::Vehicle];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meter => "meter",
            Self::Vehicle => "vehicle",
        }
    }

    /// Prefix of device identities in this stream (`meter_001`, `vehicle_001`).
    pub const fn identity_prefix(self) -> &'static str {
        self.as_str()
    }

    /// Parent table of the day-partitioned history.
    pub const fn history_table(self) -> &'static str {
        match self {
            Self::Meter => "meter_telemetry",
            Self::Vehicle => "vehicle_telemetry",
        }
    }

    /// Stream an identity belongs to, judged by its prefix.
    pub fn of_identity(identity: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| identity.starts_with(kind.identity_prefix()))
    }

    /// Identity of the device in this stream that carries `key`.
    pub fn identity_for(self, key: &CorrelationKey) -> String {
        format!("{}_{}", self.identity_prefix(), key.as_str())
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
