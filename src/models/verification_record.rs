use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Success,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Success => "success",
            VerificationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(VerificationStatus::Success),
            "failed" => Ok(VerificationStatus::Failed),
            other => Err(format!("unknown verification status '{}'", other)),
        }
    }
}

/// Outcome of one integrity audit of a backup artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub verification_status: VerificationStatus,
    pub integrity_ok: bool,
    pub restore_tested: bool,
    pub error_message: Option<String>,
}

impl VerificationRecord {
    pub fn passed(backup_id: &str, restore_tested: bool) -> Self {
        Self {
            backup_id: backup_id.to_string(),
            timestamp: Utc::now(),
            verification_status: VerificationStatus::Success,
            integrity_ok: true,
            restore_tested,
            error_message: None,
        }
    }

    pub fn failed(backup_id: &str, restore_tested: bool, error: String) -> Self {
        Self {
            backup_id: backup_id.to_string(),
            timestamp: Utc::now(),
            verification_status: VerificationStatus::Failed,
            integrity_ok: false,
            restore_tested,
            error_message: Some(error),
        }
    }
}
