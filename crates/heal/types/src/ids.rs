//! Strongly-typed identifiers for HEAL entities
//!
//! Cloud identifiers are opaque strings, wrapped in newtype structs so that an
//! instance id can never be confused with a scaling group or pool id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{TypesError, TypesResult};

/// Bare cloud instance identifier, e.g. `i-2ze0d1e7c3`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Provider identifier written by the membership agent on each machine.
///
/// The agent reports either the bare instance id or the compound
/// `<region>.<instanceId>` form, optionally behind a `<scheme>://` prefix.
/// Both forms parse to the same [`InstanceId`], and correlation compares
/// that parsed id exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderId {
    region: Option<String>,
    instance: InstanceId,
}

impl ProviderId {
    /// Compound `<region>.<instanceId>` identifier.
    pub fn new(region: impl Into<String>, instance: InstanceId) -> Self {
        Self {
            region: Some(region.into()),
            instance,
        }
    }

    /// Identifier carrying only the instance id.
    pub fn bare(instance: InstanceId) -> Self {
        Self {
            region: None,
            instance,
        }
    }

    pub fn parse(raw: &str) -> TypesResult<Self> {
        let invalid = |reason| TypesError::InvalidProviderId {
            raw: raw.to_string(),
            reason,
        };

        let trimmed = raw.trim();
        let body = match trimmed.split_once("://") {
            Some((_, rest)) => rest,
            None => trimmed,
        };
        if body.is_empty() {
            return Err(invalid("empty identifier"));
        }

        match body.split_once('.') {
            None => Ok(Self::bare(InstanceId::new(body))),
            Some((region, instance)) => {
                if region.is_empty() {
                    return Err(invalid("empty region"));
                }
                if instance.is_empty() {
                    return Err(invalid("empty instance id"));
                }
                if instance.contains('.') {
                    return Err(invalid("instance id contains '.'"));
                }
                Ok(Self::new(region, InstanceId::new(instance)))
            }
        }
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Whether this identifier refers to the given instance.
    pub fn matches(&self, id: &InstanceId) -> bool {
        &self.instance == id
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}.{}", region, self.instance),
            None => write!(f, "{}", self.instance),
        }
    }
}

impl FromStr for ProviderId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProviderId {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.to_string()
    }
}

/// Cloud scaling group identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScalingGroupId(String);

impl ScalingGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScalingGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sg:{}", self.0)
    }
}

/// Worker node pool identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool:{}", self.0)
    }
}

/// Consensus store member identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsensusMemberId(u64);

impl ConsensusMemberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsensusMemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compound_provider_id() {
        let id = ProviderId::parse("cn-hangzhou.i-abc123").unwrap();
        assert_eq!(id.region(), Some("cn-hangzhou"));
        assert_eq!(id.instance().as_str(), "i-abc123");
        assert_eq!(id.to_string(), "cn-hangzhou.i-abc123");
    }

    #[test]
    fn test_parse_bare_and_scheme_forms() {
        let bare = ProviderId::parse("i-abc123").unwrap();
        assert_eq!(bare.region(), None);

        let schemed = ProviderId::parse("alicloud://cn-beijing.i-abc123").unwrap();
        assert_eq!(schemed.region(), Some("cn-beijing"));
        assert!(schemed.matches(bare.instance()));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ProviderId::parse("").is_err());
        assert!(ProviderId::parse("   ").is_err());
        assert!(ProviderId::parse(".i-abc").is_err());
        assert!(ProviderId::parse("cn-hangzhou.").is_err());
        assert!(ProviderId::parse("cn.hangzhou.i-abc").is_err());
    }

    #[test]
    fn test_matching_is_exact() {
        let long = ProviderId::parse("cn-hangzhou.i-abc123").unwrap();
        assert!(!long.matches(&InstanceId::new("i-abc")));
        assert!(long.matches(&InstanceId::new("i-abc123")));
    }

    #[test]
    fn test_provider_id_serde_as_string() {
        let id = ProviderId::new("cn-hangzhou", InstanceId::new("i-1"));
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cn-hangzhou.i-1\"");
        let back: ProviderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_group_and_member_ids_order_as_keys() {
        let groups: std::collections::BTreeSet<_> = ["asg-np", "asg-m"]
            .into_iter()
            .map(ScalingGroupId::new)
            .collect();
        let first = groups.iter().next().unwrap();
        assert_eq!(first.as_str(), "asg-m");

        let mut members = vec![ConsensusMemberId::new(9), ConsensusMemberId::new(2)];
        members.sort();
        assert_eq!(members[0].get(), 2);
    }
}
