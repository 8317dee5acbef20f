//! Common types used throughout photodrive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned identifier of a Drive file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Create a new FileId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidInput(
                "FileId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of entries requested from a single `files.list` call.
///
/// Drive accepts 1 through 1000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PageSize(u32);

impl PageSize {
    /// Smallest accepted page size.
    pub const MIN: u32 = 1;
    /// Largest page size Drive will honour.
    pub const MAX: u32 = 1000;

    /// Create a page size.
    ///
    /// # Errors
    /// - Returns error if `size` is outside `[1, 1000]`
    pub fn new(size: u32) -> crate::Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&size) {
            return Err(crate::Error::InvalidInput(format!(
                "Page size must be between {} and {}, got {}",
                Self::MIN,
                Self::MAX,
                size
            )));
        }
        Ok(Self(size))
    }

    /// Get the numeric value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for PageSize {
    type Error = crate::Error;

    fn try_from(value: u32) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<PageSize> for u32 {
    fn from(size: PageSize) -> u32 {
        size.0
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_file_id_creation() {
        let id = FileId::new("1AbC").unwrap();
        assert_eq!(id.as_str(), "1AbC");
        assert_eq!(id.to_string(), "1AbC");
    }

    #[test]
    fn test_file_id_empty_fails() {
        assert!(FileId::new("").is_err());
        assert!(FileId::new("   ").is_err());
    }

    #[test]
    fn test_file_id_serializes_as_plain_string() {
        let id = FileId::new("folder-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"folder-1\"");
    }

    #[test]
    fn test_page_size_bounds() {
        assert!(PageSize::new(0).is_err());
        assert!(PageSize::new(1001).is_err());
        assert_eq!(PageSize::new(1).unwrap().get(), 1);
        assert_eq!(PageSize::new(1000).unwrap().get(), 1000);
    }

    #[test]
    fn test_page_size_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<PageSize>("0").is_err());
        let size: PageSize = serde_json::from_str("250").unwrap();
        assert_eq!(size.get(), 250);
    }

    proptest! {
        #[test]
        fn page_size_accepts_exactly_the_drive_range(size in 0u32..5000) {
            let accepted = PageSize::new(size).is_ok();
            prop_assert_eq!(accepted, (1..=1000).contains(&size));
        }
    }
}
