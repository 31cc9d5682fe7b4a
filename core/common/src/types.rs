//! Common types used throughout draftsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the document an autosave engine is bound to.
///
/// One engine instance manages exactly one document; the id is handed to the
/// persist collaborator on every write so it can address the remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Create a new DocumentId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty or only whitespace
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "DocumentId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_document_id_creation() {
        let id = DocumentId::new("course-42").unwrap();
        assert_eq!(id.as_str(), "course-42");
        assert_eq!(id.to_string(), "course-42");
    }

    #[test]
    fn test_document_id_empty_fails() {
        assert!(DocumentId::new("").is_err());
        assert!(DocumentId::new("   ").is_err());
    }

    proptest! {
        #[test]
        fn document_id_keeps_non_blank_input(s in "[a-z0-9-]{1,32}") {
            let id = DocumentId::new(s.clone()).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
        }
    }
}
