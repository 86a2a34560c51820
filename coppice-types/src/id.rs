use std::fmt;

use coppice_base::{value_error, Result};

/// An opaque identifier assigned by the repository, or a temporary id minted
/// locally for a not-yet-persisted node. Temporary ids are replaced by
/// permanent ones at save time; once replaced, nothing in the client holds
/// onto the old value (the session's id-remap table is consulted once, at
/// the point a reference crosses the boundary).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Id {
    Permanent(Box<str>),
    Temp(u64),
}

impl Id {
    pub fn permanent(s: impl Into<Box<str>>) -> Id {
        Id::Permanent(s.into())
    }

    pub fn temp(n: u64) -> Id {
        Id::Temp(n)
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Id::Temp(_))
    }

    /// Parses the wire representation of an id: `T<n>` is a temporary id
    /// minted by some client, anything else is taken as a permanent id
    /// verbatim. This is a purely syntactic, client-local convention -- ids
    /// returned by the repository are always `Permanent` regardless of
    /// what they happen to look like.
    pub fn parse(s: &str) -> Result<Id> {
        if let Some(rest) = s.strip_prefix('T') {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                let n: u64 = rest
                    .parse()
                    .map_err(|_| value_error(format!("id too large: {s}")))?;
                return Ok(Id::Temp(n));
            }
        }
        if s.is_empty() {
            return Err(value_error("empty id"));
        }
        Ok(Id::Permanent(s.into()))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Permanent(s) => write!(f, "{s}"),
            Id::Temp(n) => write!(f, "T{n}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip_permanent() {
        let id = Id::parse("abc-123").unwrap();
        assert_eq!(id, Id::permanent("abc-123"));
        assert_eq!(id.to_string(), "abc-123");
    }

    #[test]
    fn test_roundtrip_temp() {
        let id = Id::parse("T42").unwrap();
        assert_eq!(id, Id::temp(42));
        assert_eq!(id.to_string(), "T42");
        assert!(id.is_temp());
    }

    #[test]
    fn test_t_prefixed_non_numeric_is_permanent() {
        // "Temp1" is not purely digits after the T, so it's a permanent id
        // that just happens to start with T.
        let id = Id::parse("Temp1").unwrap();
        assert_eq!(id, Id::permanent("Temp1"));
    }

    #[test]
    fn test_empty_is_error() {
        assert!(Id::parse("").is_err());
    }
}
