//! Field-level predicates for `find`.

use crate::document::Document;
use serde_json::Value;

/// A conjunctive field-equality predicate.
///
/// Every clause must match for a document to be selected. The reserved
/// field name `"_id"` matches against the document id; all other names
/// match payload fields exactly.
///
/// # Example
///
/// ```rust
/// use foliodb_store::Selector;
/// use serde_json::json;
///
/// let pages_named_home = Selector::new()
///     .field("type", json!("page"))
///     .field("title", json!("Home"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Selector {
    clauses: Vec<(String, Value)>,
}

impl Selector {
    /// Creates an empty selector that matches every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exact-equality clause on a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.clauses.push((name.into(), value));
        self
    }

    /// Returns true if the selector has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Tests a document against all clauses.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|(name, expected)| {
            if name == "_id" {
                expected.as_str() == Some(doc.id.as_str())
            } else {
                doc.field(name) == Some(expected)
            }
        })
    }
}

/// Options for `list_all`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Return documents in descending id order.
    pub descending: bool,
}

impl ListOptions {
    /// Creates default options: all documents, ascending by id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of returned documents.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reverses the id order.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn page(id: &str, title: &str) -> Document {
        let mut data = Map::new();
        data.insert("type".into(), json!("page"));
        data.insert("title".into(), json!(title));
        Document::new(id, data)
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel = Selector::new();
        assert!(sel.matches(&page("p1", "Home")));
    }

    #[test]
    fn field_equality() {
        let sel = Selector::new().field("title", json!("Home"));
        assert!(sel.matches(&page("p1", "Home")));
        assert!(!sel.matches(&page("p2", "About")));
    }

    #[test]
    fn conjunction_requires_all_clauses() {
        let sel = Selector::new()
            .field("type", json!("page"))
            .field("title", json!("Home"));
        assert!(sel.matches(&page("p1", "Home")));

        let sel = sel.field("missing", json!(true));
        assert!(!sel.matches(&page("p1", "Home")));
    }

    #[test]
    fn id_clause_matches_document_id() {
        let sel = Selector::new().field("_id", json!("p1"));
        assert!(sel.matches(&page("p1", "Home")));
        assert!(!sel.matches(&page("p2", "Home")));
    }

    #[test]
    fn value_types_must_match_exactly() {
        let mut data = Map::new();
        data.insert("count".into(), json!(1));
        let doc = Document::new("d", data);

        assert!(Selector::new().field("count", json!(1)).matches(&doc));
        assert!(!Selector::new().field("count", json!("1")).matches(&doc));
    }
}
