//! Document → tree
//!
//! The reader walks a document against a freshly built schema tree. Names
//! the schema does not know are skipped with a warning so documents from
//! older or newer producers still restore. Values are loaded verbatim; no
//! transform or type coercion runs on the way in.

use crate::document::{Document, Node};
use crate::error::DocumentError;
use crate::version::FormatVersion;
use cbr_element::{Element, ElementKind, ProcessContext, Value};
use std::fmt;

/// Why an entry was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No element with this name
    Unknown,
    /// Element exists but is of another kind
    KindMismatch,
    /// Optigroup entry that no registered alternative accepts
    NoAlternative,
    /// Second entry inside an optigroup
    ExtraAlternative,
}

/// Entry skipped while reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWarning {
    /// Slash path of the containing group
    pub path: String,
    /// Skipped entry name
    pub name: String,
    /// Whether it was a group
    pub group: bool,
    /// Why
    pub reason: SkipReason,
}

impl fmt::Display for ReadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.group { "group" } else { "leaf" };
        let why = match self.reason {
            SkipReason::Unknown => "unknown element",
            SkipReason::KindMismatch => "kind mismatch",
            SkipReason::NoAlternative => "no matching alternative",
            SkipReason::ExtraAlternative => "optigroup already filled",
        };
        write!(f, "skipped {what} `{}` under `{}`: {why}", self.name, self.path)
    }
}

/// Tree read from a document plus what was skipped
#[derive(Debug)]
pub struct ReadOutcome {
    /// Filled tree
    pub tree: Element,
    /// Skipped entries in document order
    pub warnings: Vec<ReadWarning>,
}

/// Fill `schema` from `document`
///
/// # Errors
/// Newer major version, root name mismatch, or a malformed schema
pub fn read(document: &Document, schema: Element, ctx: &ProcessContext) -> Result<ReadOutcome, DocumentError> {
    FormatVersion::CURRENT.accepts(document.version)?;

    let Node::Group { name, children } = &document.root else {
        return Err(DocumentError::NotAGroup(document.root_name().to_string()));
    };
    if name != schema.name() || schema.kind() != ElementKind::Composite {
        return Err(DocumentError::RootMismatch {
            expected: schema.name().to_string(),
            found: name.clone(),
        });
    }

    let mut reader = Reader {
        ctx,
        path: vec![name.clone()],
        warnings: Vec::new(),
    };
    let mut tree = schema;
    if tree.is_repeated() {
        let instance = tree.push_instance()?;
        reader.group(instance, children)?;
    } else {
        reader.group(&mut tree, children)?;
    }
    Ok(ReadOutcome {
        tree,
        warnings: reader.warnings,
    })
}

struct Reader<'a> {
    ctx: &'a ProcessContext,
    path: Vec<String>,
    warnings: Vec<ReadWarning>,
}

impl Reader<'_> {
    fn group(&mut self, element: &mut Element, children: &[Node]) -> Result<(), DocumentError> {
        for node in children {
            match node {
                Node::Leaf { name, value } => match element.child_mut(name) {
                    Some(child) if child.kind() == ElementKind::Scalar => {
                        child.load_value(Value::from_option(value.clone()))?;
                    }
                    Some(_) => self.skip(name, false, SkipReason::KindMismatch),
                    None => self.skip(name, false, SkipReason::Unknown),
                },
                Node::Group { name, children } => match element.child_mut(name) {
                    Some(child) => self.nested(child, name, children)?,
                    None => self.skip(name, true, SkipReason::Unknown),
                },
            }
        }
        Ok(())
    }

    fn nested(&mut self, child: &mut Element, name: &str, children: &[Node]) -> Result<(), DocumentError> {
        self.path.push(name.to_string());
        let result = match child.kind() {
            ElementKind::Composite if child.is_repeated() => {
                let instance = child.push_instance()?;
                self.group(instance, children)
            }
            ElementKind::Composite => self.group(child, children),
            ElementKind::Optigroup => self.optigroup(child, children),
            ElementKind::Scalar => {
                self.path.pop();
                self.skip(name, true, SkipReason::KindMismatch);
                return Ok(());
            }
        };
        self.path.pop();
        result
    }

    fn optigroup(&mut self, slot: &mut Element, children: &[Node]) -> Result<(), DocumentError> {
        let mut filled = false;
        for node in children {
            let Node::Group { name, children } = node else {
                self.skip(node.name(), false, SkipReason::KindMismatch);
                continue;
            };
            if filled {
                self.skip(name, true, SkipReason::ExtraAlternative);
                continue;
            }
            match slot.resolve_as(name, self.ctx)? {
                Some(alternative) => {
                    self.path.push(name.clone());
                    let result = self.group(alternative, children);
                    self.path.pop();
                    result?;
                    filled = true;
                }
                None => self.skip(name, true, SkipReason::NoAlternative),
            }
        }
        Ok(())
    }

    fn skip(&mut self, name: &str, group: bool, reason: SkipReason) {
        let warning = ReadWarning {
            path: self.path.join("/"),
            name: name.to_string(),
            group,
            reason,
        };
        tracing::warn!(path = %warning.path, name, ?reason, "skipping document entry");
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbr_element::{fixed_selector, AlternativeSet, FnAlternative};
    use std::sync::Arc;

    fn leaf(name: &str, value: &str) -> Node {
        Node::Leaf {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    fn group(name: &str, children: Vec<Node>) -> Node {
        Node::Group {
            name: name.to_string(),
            children,
        }
    }

    #[test]
    fn unknown_entries_are_skipped_with_warning() {
        let ctx = ProcessContext::detached();
        let doc = Document::new(group(
            "course",
            vec![leaf("id", "3"), leaf("legacyfield", "x"), group("newstuff", vec![])],
        ));
        let schema = Element::composite("course", vec![Element::scalar("id")]).unwrap();

        let out = read(&doc, schema, &ctx).unwrap();
        assert_eq!(out.tree.child_text("id"), Some("3"));
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.warnings[0].name, "legacyfield");
        assert_eq!(out.warnings[1].reason, SkipReason::Unknown);
        assert!(out.warnings[1].group);
    }

    #[test]
    fn values_stay_text() {
        let ctx = ProcessContext::detached();
        let doc = Document::new(group("course", vec![leaf("startdate", "1700000000.123456789")]));
        let schema = Element::composite("course", vec![Element::scalar("startdate")]).unwrap();
        let out = read(&doc, schema, &ctx).unwrap();
        assert_eq!(out.tree.child_text("startdate"), Some("1700000000.123456789"));
    }

    #[test]
    fn root_mismatch() {
        let ctx = ProcessContext::detached();
        let doc = Document::new(group("section", vec![]));
        let schema = Element::composite("course", vec![]).unwrap();
        assert!(matches!(read(&doc, schema, &ctx), Err(DocumentError::RootMismatch { .. })));
    }

    #[test]
    fn missing_plugin_degrades_to_empty_group() {
        let ctx = ProcessContext::detached();
        let doc = Document::new(group(
            "section",
            vec![group("format_options", vec![group("grid_options", vec![leaf("imagesize", "3")])])],
        ));
        let alternatives = AlternativeSet::new()
            .with(Arc::new(FnAlternative::new("topics", || {
                Element::composite("topics_options", vec![Element::scalar("layout")])
            })))
            .unwrap();
        let schema = Element::composite(
            "section",
            vec![Element::optigroup("format_options", alternatives, Some(fixed_selector("topics")))],
        )
        .unwrap();

        let out = read(&doc, schema, &ctx).unwrap();
        assert_eq!(out.warnings[0].reason, SkipReason::NoAlternative);
        assert!(out.tree.child("format_options").unwrap().resolved().is_none());
    }
}
