//! Pasteboard type identifiers and type-list operations.
//!
//! A type is nothing more than an identity: two types are the same if
//! their identifiers are byte-for-byte equal. Lists of types keep the
//! order the caller gave them, minus duplicates.

use std::fmt;

/// Plain UTF-8 text. Used as the CLI default.
pub const TEXT: &str = "text/plain";

/// A pasteboard data type identifier (e.g. `text/plain`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PasteboardType(String);

/// Rejected type identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid pasteboard type: {0:?}")]
pub struct InvalidType(pub String);

impl PasteboardType {
    /// Validate and wrap a type identifier. Empty strings are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidType> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidType(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PasteboardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<PasteboardType> for String {
    fn from(ty: PasteboardType) -> Self {
        ty.0
    }
}

/// Parse a caller-supplied list of identifiers into a deduplicated,
/// order-preserving type list. Fails on the first invalid identifier.
pub fn parse_type_list<I, S>(names: I) -> Result<Vec<PasteboardType>, InvalidType>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = Vec::new();
    for name in names {
        append_unique(&mut out, PasteboardType::new(name)?);
    }
    Ok(out)
}

/// Push `ty` onto `list` unless it is already present.
///
/// Returns `true` if the list grew.
pub fn append_unique(list: &mut Vec<PasteboardType>, ty: PasteboardType) -> bool {
    if list.contains(&ty) {
        return false;
    }
    list.push(ty);
    true
}

/// First candidate (in candidate order) that appears in `declared`.
pub fn first_available<'a>(
    candidates: &'a [PasteboardType],
    declared: &[PasteboardType],
) -> Option<&'a PasteboardType> {
    candidates.iter().find(|c| declared.contains(c))
}

/// Render a type list back to wire strings.
pub fn to_strings(types: &[PasteboardType]) -> Vec<String> {
    types.iter().map(|t| t.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(s: &str) -> PasteboardType {
        PasteboardType::new(s).unwrap()
    }

    #[test]
    fn empty_type_rejected() {
        assert_eq!(PasteboardType::new(""), Err(InvalidType(String::new())));
    }

    #[test]
    fn identity_is_case_sensitive() {
        assert_ne!(ty("text/plain"), ty("Text/Plain"));
    }

    #[test]
    fn parse_removes_duplicates_keeping_first() {
        let list = parse_type_list(["text", "image", "text", "html", "image"]).unwrap();
        assert_eq!(list, vec![ty("text"), ty("image"), ty("html")]);
    }

    #[test]
    fn parse_fails_on_any_empty_entry() {
        assert!(parse_type_list(["text", ""]).is_err());
    }

    #[test]
    fn append_unique_reports_growth() {
        let mut list = vec![ty("text")];
        assert!(!append_unique(&mut list, ty("text")));
        assert!(append_unique(&mut list, ty("image")));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn first_available_honours_candidate_order() {
        let declared = vec![ty("text"), ty("image")];
        let candidates = vec![ty("image"), ty("text")];
        assert_eq!(first_available(&candidates, &declared), Some(&ty("image")));
    }

    #[test]
    fn first_available_none_when_disjoint() {
        let declared = vec![ty("text")];
        let candidates = vec![ty("rtf"), ty("html")];
        assert_eq!(first_available(&candidates, &declared), None);
    }
}
