use serde::{Deserialize, Serialize};

/// Blob storage events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageEvent {
    Uploaded {
        handler: String,
        key: String,
        bytes: u64,
    },

    Downloaded { handler: String, key: String },

    Deleted { handler: String, key: String },
}
