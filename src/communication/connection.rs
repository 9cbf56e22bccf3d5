use std::fmt;

use serde::{Deserialize, Serialize};

/// Partitions connections so that unrelated traffic never shares sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Console to agent commands.
    Control,
    /// Agent and worker reports to the console.
    Report,
}

impl ConnectionType {
    pub const ALL: [ConnectionType; 2] = [ConnectionType::Control, ConnectionType::Report];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Control => "control",
            ConnectionType::Report => "report",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}
