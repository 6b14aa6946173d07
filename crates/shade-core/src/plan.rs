//! Subscription plans and their trigger caps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Default tier.
    #[default]
    Free,
    /// Paid tier.
    Pro,
    /// Top paid tier.
    Premium,
}

impl Plan {
    /// Maximum number of triggers a user on this plan may keep.
    ///
    /// An expired plan caps at zero regardless of tier.
    #[must_use]
    pub fn trigger_limit(self, plan_active: bool) -> u32 {
        if !plan_active {
            return 0;
        }
        match self {
            Self::Free => 3,
            Self::Pro => 10,
            Self::Premium => 20,
        }
    }

    /// Stable lowercase name, as stored and sent on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "premium" => Ok(Self::Premium),
            other => Err(UnknownPlan(other.to_owned())),
        }
    }
}

/// Error for a plan name outside the known set.
#[derive(Debug, thiserror::Error)]
#[error("unknown plan: {0}")]
pub struct UnknownPlan(pub String);
