//! MongoDB checkpoint management
//!
//! A checkpoint here is a serialized change-stream resume token. Resuming
//! after it replays every change made since the token was taken.

use anyhow::Result;
use chrono::{DateTime, Utc};
use mongodb::change_stream::event::ResumeToken;
use serde::{Deserialize, Serialize};

/// MongoDB-specific checkpoint containing resume token and timestamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MongoDBCheckpoint {
    /// BSON-encoded change stream resume token
    pub resume_token: Vec<u8>,
    /// Timestamp when checkpoint was created
    pub timestamp: DateTime<Utc>,
}

impl MongoDBCheckpoint {
    pub fn new(resume_token: Vec<u8>) -> Self {
        Self {
            resume_token,
            timestamp: Utc::now(),
        }
    }

    /// Decode the stored bytes back into a driver resume token.
    ///
    /// Fails instead of falling back to "now": starting from the current
    /// position would silently skip every change since the checkpoint.
    pub fn to_resume_token(&self) -> Result<ResumeToken> {
        decode_resume_token(&self.resume_token)
    }
}

pub(crate) fn decode_resume_token(bytes: &[u8]) -> Result<ResumeToken> {
    bson::from_slice::<ResumeToken>(bytes).map_err(|e| {
        anyhow::anyhow!(
            "Failed to deserialize resume token - refusing to start to prevent data loss. \
            Error: {e}. Run a full snapshot instead of resuming, or provide a valid checkpoint."
        )
    })
}

impl checkpoint::Checkpoint for MongoDBCheckpoint {
    const DATABASE_TYPE: &'static str = "mongodb";

    fn to_cli_string(&self) -> String {
        use base64::{engine::general_purpose, Engine as _};
        format!(
            "{}:{}",
            general_purpose::STANDARD.encode(&self.resume_token),
            self.timestamp.to_rfc3339()
        )
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        use base64::{engine::general_purpose, Engine as _};

        let parts: Vec<&str> = s.splitn(2, ':').collect();
        if parts.len() != 2 {
            anyhow::bail!(
                "Invalid MongoDB checkpoint format: expected 'base64token:timestamp', got '{s}'"
            );
        }

        if parts[0].is_empty() {
            anyhow::bail!("Invalid MongoDB checkpoint: resume token cannot be empty");
        }

        let resume_token = general_purpose::STANDARD
            .decode(parts[0])
            .map_err(|e| anyhow::anyhow!("Invalid base64 resume token: {e}"))?;

        let timestamp = DateTime::parse_from_rfc3339(parts[1])
            .map_err(|e| anyhow::anyhow!("Invalid timestamp format: {e}"))?
            .with_timezone(&Utc);

        Ok(Self {
            resume_token,
            timestamp,
        })
    }
}
