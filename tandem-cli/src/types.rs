//! Common types used across CLI modules

use uuid::Uuid;

/// Identifier that can be either a full UUID or an unambiguous prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdOrPrefix {
    Full(Uuid),
    /// Prefix that should uniquely identify a run
    Prefix(String),
}

impl IdOrPrefix {
    /// Parses a full UUID, otherwise keeps the input as a lowercase prefix
    pub fn parse(input: &str) -> Self {
        match Uuid::parse_str(input.trim()) {
            Ok(uuid) => IdOrPrefix::Full(uuid),
            Err(_) => IdOrPrefix::Prefix(input.trim().to_lowercase()),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            IdOrPrefix::Full(uuid) => Some(*uuid),
            IdOrPrefix::Prefix(_) => None,
        }
    }
}

impl std::fmt::Display for IdOrPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdOrPrefix::Full(uuid) => write!(f, "{}", uuid),
            IdOrPrefix::Prefix(prefix) => write!(f, "{}", prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let id = Uuid::new_v4();
        assert_eq!(IdOrPrefix::parse(&id.to_string()), IdOrPrefix::Full(id));
        assert_eq!(
            IdOrPrefix::parse("3F2A"),
            IdOrPrefix::Prefix("3f2a".to_string())
        );
        assert!(IdOrPrefix::parse("3f2a").as_uuid().is_none());
    }
}
