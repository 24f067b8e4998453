use serde::{Deserialize, Serialize};

use super::SpliceStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SpliceEvent {
    StatusChanged {
        channel_id: String,
        status: SpliceStatus,
    },
    ConfirmationsUpdated {
        channel_id: String,
        confirmations: u32,
    },
    Cleared {
        channel_id: String,
    },
    Reset,
}

impl SpliceEvent {
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::StatusChanged { channel_id, .. }
            | Self::ConfirmationsUpdated { channel_id, .. }
            | Self::Cleared { channel_id } => Some(channel_id),
            Self::Reset => None,
        }
    }
}
