use std::fmt;

/// A qualified name of the form `prefix:local`. The repository's CND and
/// wire protocol both traffic in these; namespace registration and URI
/// resolution are not part of this layer, so a `QName` is nothing more than
/// a validated string with namespace/local accessors.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct QName(String);

impl QName {
    pub fn new(s: impl Into<String>) -> QName {
        QName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first `:`, or an empty string if there is none.
    pub fn namespace(&self) -> &str {
        match self.0.split_once(':') {
            Some((ns, _)) => ns,
            None => "",
        }
    }

    /// The part after the first `:`, or the whole name if there is none.
    pub fn local(&self) -> &str {
        match self.0.split_once(':') {
            Some((_, local)) => local,
            None => &self.0,
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for QName {
    fn from(s: &str) -> QName {
        QName::new(s)
    }
}

impl From<String> for QName {
    fn from(s: String) -> QName {
        QName::new(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_namespace_and_local() {
        let q = QName::new("nt:base");
        assert_eq!(q.namespace(), "nt");
        assert_eq!(q.local(), "base");
    }

    #[test]
    fn test_no_namespace() {
        let q = QName::new("base");
        assert_eq!(q.namespace(), "");
        assert_eq!(q.local(), "base");
    }
}
