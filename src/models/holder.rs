use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of whoever owns a hold.
///
/// Stored and transmitted as `user:<id>`, `guest:<uuid>` or `staff:<id>`.
/// Two tokens are equal only if both the kind and the id match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HolderToken {
    User(i64),
    Guest(Uuid),
    Staff(i64),
}

impl HolderToken {
    pub fn new_guest() -> Self {
        HolderToken::Guest(Uuid::new_v4())
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, HolderToken::Guest(_))
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderToken::User(id) => write!(f, "user:{id}"),
            HolderToken::Guest(id) => write!(f, "guest:{id}"),
            HolderToken::Staff(id) => write!(f, "staff:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed holder token: {0}")]
pub struct ParseHolderError(pub String);

impl FromStr for HolderToken {
    type Err = ParseHolderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseHolderError(s.to_string()))?;

        let bad = || ParseHolderError(s.to_string());
        match kind {
            "user" => id.parse().map(HolderToken::User).map_err(|_| bad()),
            "staff" => id.parse().map(HolderToken::Staff).map_err(|_| bad()),
            "guest" => Uuid::parse_str(id).map(HolderToken::Guest).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}

impl Serialize for HolderToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HolderToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_kind() {
        let guest = Uuid::new_v4();
        assert_eq!("user:42".parse::<HolderToken>().unwrap(), HolderToken::User(42));
        assert_eq!("staff:3".parse::<HolderToken>().unwrap(), HolderToken::Staff(3));
        assert_eq!(
            format!("guest:{guest}").parse::<HolderToken>().unwrap(),
            HolderToken::Guest(guest)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("42".parse::<HolderToken>().is_err());
        assert!("admin:1".parse::<HolderToken>().is_err());
        assert!("guest:not-a-uuid".parse::<HolderToken>().is_err());
        assert!("user:abc".parse::<HolderToken>().is_err());
    }

    #[test]
    fn same_id_different_kind_is_not_equal() {
        assert_ne!(HolderToken::User(1), HolderToken::Staff(1));
    }

    #[test]
    fn display_round_trips_through_serde() {
        let token = HolderToken::Staff(9);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"staff:9\"");
        let back: HolderToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
