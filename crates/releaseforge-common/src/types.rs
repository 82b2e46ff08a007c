//! Status types shared by the durable store and the pipeline.
//!
//! [`QualityStatus`] is what the release store persists. [`QualityState`] is the
//! transient per-(item, quality) state machine the pipeline walks through.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable status of one quality within a release record.
///
/// Only ever moves `Pending -> Uploaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    /// The artifact is being published; nothing is referenced yet.
    Pending,
    /// The artifact was published and recorded.
    Uploaded,
}

impl QualityStatus {
    /// Whether the quality has been published and recorded.
    pub fn is_uploaded(self) -> bool {
        matches!(self, Self::Uploaded)
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Uploaded => write!(f, "uploaded"),
        }
    }
}

impl std::str::FromStr for QualityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploaded" => Ok(Self::Uploaded),
            _ => Err(format!("Invalid quality status: {}", s)),
        }
    }
}

/// Transient pipeline state of one (work item, quality) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityState {
    Pending,
    Downloading,
    Transcoding,
    Publishing,
    Uploaded,
    Failed,
}

impl QualityState {
    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Uploaded | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Forward moves along `Pending -> Downloading -> Transcoding -> Publishing
    /// -> Uploaded` are allowed, as is any non-terminal state to `Failed`.
    pub fn can_transition_to(self, next: QualityState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        self.rank() < next.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Downloading => 1,
            Self::Transcoding => 2,
            Self::Publishing => 3,
            Self::Uploaded => 4,
            Self::Failed => 5,
        }
    }
}

impl fmt::Display for QualityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Transcoding => write!(f, "transcoding"),
            Self::Publishing => write!(f, "publishing"),
            Self::Uploaded => write!(f, "uploaded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
