//! Identifier types shared by every store.
//!
//! Requesters and reviewers live in the same id namespace: the same person can
//! wait in a queue one day and review the next. Newtypes keep user ids, ticket
//! ids and the opaque references handed to us by the transport from being mixed
//! up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// One of the fixed, fully independent queue partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "EU")]
    Eu,
    #[serde(rename = "NA")]
    Na,
    #[serde(rename = "AS")]
    As,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Eu, Region::Na, Region::As];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eu => "EU",
            Self::Na => "NA",
            Self::As => "AS",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = QueueError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EU" => Ok(Self::Eu),
            "NA" => Ok(Self::Na),
            "AS" => Ok(Self::As),
            _ => Err(QueueError::UnknownRegion(s.to_string())),
        }
    }
}

/// A requester or reviewer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Validate an id coming from outside the process.
    pub fn parse(raw: &str) -> Result<Self, QueueError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(QueueError::InvalidUserId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a live pairing session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub String);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TicketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TicketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque reference to the channel a session runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelRef(pub String);

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque reference to something a waitlist member was granted access to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef(pub String);

impl From<&str> for ResourceRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_parse_is_case_insensitive() {
        assert_eq!("eu".parse::<Region>(), Ok(Region::Eu));
        assert_eq!(" Na ".parse::<Region>(), Ok(Region::Na));
        assert_eq!("AS".parse::<Region>(), Ok(Region::As));
    }

    #[test]
    fn test_region_parse_rejects_unknown() {
        assert_eq!(
            "OC".parse::<Region>(),
            Err(QueueError::UnknownRegion("OC".to_string()))
        );
    }

    #[test]
    fn test_region_serializes_as_code() {
        let json = serde_json::to_string(&Region::Eu).unwrap();
        assert_eq!(json, "\"EU\"");
    }

    #[test]
    fn test_user_id_parse_trims_and_rejects_blank() {
        assert_eq!(UserId::parse("  u1 "), Ok(UserId::from("u1")));
        assert_eq!(UserId::parse("   "), Err(QueueError::InvalidUserId));
    }
}
