use serde::Serialize;
use std::fmt;

/// Response header carrying the verdict on downloads.
pub const INTEGRITY_HEADER: &str = "X-Integrity-Status";

/// The user-facing integrity verdict. The two strings are part of the
/// observable contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntegrityVerdict {
    #[serde(rename = "No contamination detected")]
    Clean,
    #[serde(rename = "Contaminated")]
    Contaminated,
}

impl IntegrityVerdict {
    pub fn from_verified(verified: bool) -> Self {
        if verified {
            Self::Clean
        } else {
            Self::Contaminated
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "No contamination detected",
            Self::Contaminated => "Contaminated",
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

impl fmt::Display for IntegrityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
