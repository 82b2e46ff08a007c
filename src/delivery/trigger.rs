use releaseforge_common::{Identity, QualityLabel};
use std::fmt;
use std::str::FromStr;

const PREFIX: &str = "deliver";

/// Payload carried by a delivery button on a release post.
///
/// Encoded as `deliver|<identity>|<quality>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTrigger {
    pub identity: Identity,
    pub quality: QualityLabel,
}

impl DeliveryTrigger {
    pub fn new(identity: Identity, quality: QualityLabel) -> Self {
        Self { identity, quality }
    }

    pub fn payload(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DeliveryTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", PREFIX, self.identity, self.quality)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Malformed delivery payload: {0:?}")]
pub struct MalformedTrigger(pub String);

impl FromStr for DeliveryTrigger {
    type Err = MalformedTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedTrigger(s.to_string());

        let mut parts = s.trim().splitn(3, '|');
        if parts.next() != Some(PREFIX) {
            return Err(malformed());
        }
        let identity = parts.next().filter(|p| !p.is_empty()).ok_or_else(malformed)?;
        let quality = parts
            .next()
            .filter(|p| !p.is_empty() && !p.contains('|'))
            .ok_or_else(malformed)?;

        Ok(Self::new(Identity::new(identity), QualityLabel::new(quality)))
    }
}
