//! Document model and JSON encoding
//!
//! Children are always JSON arrays so document order is the tree's
//! insertion order.

use crate::error::DocumentError;
use crate::version::FormatVersion;
use serde::{Deserialize, Serialize};

/// Format identifier written into every document
pub const FORMAT_NAME: &str = "cbr-element-document";

/// One entry of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    /// Composite or optigroup
    Group {
        /// Element name
        name: String,
        /// Entries in order
        #[serde(default)]
        children: Vec<Node>,
    },
    /// Scalar; `None` is an explicit null
    Leaf {
        /// Element name
        name: String,
        /// Text value
        value: Option<String>,
    },
}

impl Node {
    /// Entry name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Group { name, .. } | Self::Leaf { name, .. } => name,
        }
    }

    /// Child entries (empty for leaves)
    #[must_use]
    pub fn children(&self) -> &[Node] {
        match self {
            Self::Group { children, .. } => children,
            Self::Leaf { .. } => &[],
        }
    }

    /// First child group or leaf named `name`
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|n| n.name() == name)
    }
}

/// Versioned, self-describing element document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Always [`FORMAT_NAME`]
    pub format: String,
    /// Schema version, checked before anything else is read
    pub version: FormatVersion,
    /// Root group
    pub root: Node,
}

impl Document {
    /// Document at the current version around `root`
    #[must_use]
    pub fn new(root: Node) -> Self {
        Self {
            format: FORMAT_NAME.to_string(),
            version: FormatVersion::CURRENT,
            root,
        }
    }

    /// Override the declared version
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: FormatVersion) -> Self {
        self.version = version;
        self
    }

    /// Root element name
    #[must_use]
    pub fn root_name(&self) -> &str {
        self.root.name()
    }

    /// Pretty JSON
    ///
    /// # Errors
    /// Serialization failure
    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON, checking the version against [`FormatVersion::CURRENT`]
    /// before the body is decoded
    ///
    /// # Errors
    /// [`DocumentError::Unsupported`] for a newer major version, otherwise
    /// parse errors
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        Self::from_json_with(json, FormatVersion::CURRENT)
    }

    /// [`from_json`](Self::from_json) for a reader at `supported`
    ///
    /// # Errors
    /// See [`from_json`](Self::from_json)
    pub fn from_json_with(json: &str, supported: FormatVersion) -> Result<Self, DocumentError> {
        #[derive(Deserialize)]
        struct Header {
            version: Option<String>,
        }

        let header: Header = serde_json::from_str(json)?;
        let version: FormatVersion = header.version.ok_or(DocumentError::MissingVersion)?.parse()?;
        supported.accepts(version)?;
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::new(Node::Group {
            name: "course".to_string(),
            children: vec![
                Node::Leaf {
                    name: "id".to_string(),
                    value: Some("2".to_string()),
                },
                Node::Leaf {
                    name: "summary".to_string(),
                    value: None,
                },
                Node::Group {
                    name: "tags".to_string(),
                    children: vec![],
                },
            ],
        })
    }

    #[test]
    fn json_keeps_child_order() {
        let json = sample().to_json().unwrap();
        let id = json.find("\"id\"").unwrap();
        let summary = json.find("\"summary\"").unwrap();
        assert!(id < summary);
        assert_eq!(Document::from_json(&json).unwrap(), sample());
    }

    #[test]
    fn newer_major_refused_before_body() {
        // body is not a valid document, the version check must fire first
        let json = r#"{"format":"x","version":"2.0","root":42}"#;
        let err = Document::from_json(json).unwrap_err();
        assert!(err.unsupported_version().is_some());
    }

    #[test]
    fn newer_minor_accepted() {
        let json = sample().with_version(FormatVersion::new(1, 7)).to_json().unwrap();
        assert_eq!(Document::from_json(&json).unwrap().version, FormatVersion::new(1, 7));
    }

    #[test]
    fn missing_version_rejected() {
        let err = Document::from_json(r#"{"format":"x","root":{"type":"leaf","name":"a","value":null}}"#).unwrap_err();
        assert!(matches!(err, DocumentError::MissingVersion));
    }
}
