//! Tree → document

use crate::document::{Document, Node};
use crate::error::DocumentError;
use cbr_element::{Element, ElementVisitor, ProcessContext, ProcessError};
use std::convert::Infallible;

/// Builds nodes from traversal events
#[derive(Debug, Default)]
struct NodeBuilder {
    stack: Vec<(String, Vec<Node>)>,
    roots: Vec<Node>,
}

impl ElementVisitor for NodeBuilder {
    type Error = Infallible;

    fn open(&mut self, name: &str) -> Result<(), Infallible> {
        self.stack.push((name.to_string(), Vec::new()));
        Ok(())
    }

    fn leaf(&mut self, name: &str, value: Option<&str>) -> Result<(), Infallible> {
        let node = Node::Leaf {
            name: name.to_string(),
            value: value.map(str::to_string),
        };
        match self.stack.last_mut() {
            Some((_, children)) => children.push(node),
            None => self.roots.push(node),
        }
        Ok(())
    }

    fn close(&mut self, _name: &str) -> Result<(), Infallible> {
        if let Some((name, children)) = self.stack.pop() {
            let node = Node::Group { name, children };
            match self.stack.last_mut() {
                Some((_, parent)) => parent.push(node),
                None => self.roots.push(node),
            }
        }
        Ok(())
    }
}

/// Serialize `tree` into a document at the current format version
///
/// Every composite becomes a group (empty ones included), every scalar with
/// a value becomes a leaf.
///
/// # Errors
/// [`DocumentError::NotAGroup`] unless the tree yields exactly one root
/// group, or a structure error while resolving optigroups
pub fn write(tree: &Element, ctx: &ProcessContext) -> Result<Document, DocumentError> {
    let mut builder = NodeBuilder::default();
    match tree.process(&mut builder, ctx) {
        Ok(()) => {}
        Err(ProcessError::Structure(e)) => return Err(e.into()),
        Err(ProcessError::Visitor(never)) => match never {},
    }

    let mut roots = builder.roots;
    match (roots.pop(), roots.is_empty()) {
        (Some(root @ Node::Group { .. }), true) => {
            tracing::trace!(root = %root.name(), "wrote document");
            Ok(Document::new(root))
        }
        _ => Err(DocumentError::NotAGroup(tree.name().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbr_element::Record;

    #[test]
    fn empty_composites_are_kept() {
        let ctx = ProcessContext::detached();
        let mut course = Element::composite(
            "course",
            vec![Element::scalar("id"), Element::composite("tags", vec![]).unwrap()],
        )
        .unwrap();
        course.fill_values(&Record::new().with("id", 4), &ctx).unwrap();

        let doc = write(&course, &ctx).unwrap();
        assert_eq!(doc.root_name(), "course");
        assert_eq!(doc.root.children().len(), 2);
        assert!(matches!(doc.root.find("tags"), Some(Node::Group { children, .. }) if children.is_empty()));
    }

    #[test]
    fn scalar_root_rejected() {
        let ctx = ProcessContext::detached();
        let mut id = Element::scalar("id");
        id.set_value(Some("1".into()), &ctx).unwrap();
        assert!(matches!(write(&id, &ctx), Err(DocumentError::NotAGroup(_))));
    }
}
