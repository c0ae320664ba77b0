//! Closed vocabularies for queued mutations.
//!
//! Every queued mutation names an operation, the kind of wallet object it
//! targets and a processing priority. Each set is closed: parsing anything
//! else is a construction-time [`DomainError`].

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Operation kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Share,
    Verify,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Create,
        OperationType::Update,
        OperationType::Delete,
        OperationType::Share,
        OperationType::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
            OperationType::Share => "share",
            OperationType::Verify => "verify",
        }
    }
}

/// Kind of wallet object a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A verifiable credential held by the wallet.
    Credential,
    /// A DID connection handshake with another party.
    Handshake,
    /// The wallet owner's profile.
    Profile,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Credential,
        ResourceKind::Handshake,
        ResourceKind::Profile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Credential => "credential",
            ResourceKind::Handshake => "handshake",
            ResourceKind::Profile => "profile",
        }
    }
}

/// Processing precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Sort rank: lower ranks are processed first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

macro_rules! impl_closed_vocabulary {
    ($t:ty, $name:literal) => {
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| DomainError::validation(format!("unknown {}: {:?}", $name, s)))
            }
        }
    };
}

impl_closed_vocabulary!(OperationType, "operation type");
impl_closed_vocabulary!(ResourceKind, "resource kind");
impl_closed_vocabulary!(Priority, "priority");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_member() {
        for op in OperationType::ALL {
            assert_eq!(op.as_str().parse::<OperationType>().unwrap(), op);
        }
        for resource in ResourceKind::ALL {
            assert_eq!(resource.as_str().parse::<ResourceKind>().unwrap(), resource);
        }
        for priority in Priority::ALL {
            assert_eq!(priority.as_str().parse::<Priority>().unwrap(), priority);
        }
    }

    #[test]
    fn rejects_values_outside_the_vocabulary() {
        assert!(matches!(
            "revoke".parse::<OperationType>(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            "did".parse::<ResourceKind>(),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(DomainError::Validation(_))
        ));
        // Case matters; the wire names are lowercase.
        assert!("High".parse::<Priority>().is_err());
    }

    #[test]
    fn priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn priority_rank_orders_high_first() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ResourceKind::Handshake).unwrap();
        assert_eq!(json, "\"handshake\"");

        let op: OperationType = serde_json::from_str("\"share\"").unwrap();
        assert_eq!(op, OperationType::Share);

        assert!(serde_json::from_str::<Priority>("\"urgent\"").is_err());
    }
}
