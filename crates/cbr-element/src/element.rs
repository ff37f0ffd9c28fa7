//! The element tree
//!
//! [`Element`] is a tagged variant: a scalar holding one text value, a
//! composite holding named children in insertion order (optionally repeated
//! once per source row), or an optigroup slot filled by at most one plugin
//! alternative.
//!
//! Trees are built by tasks, filled from [`Record`]s during backup or from a
//! document during restore, and walked with an [`ElementVisitor`].

use crate::context::ProcessContext;
use crate::error::{ElementError, ProcessError, StructureError};
use crate::optigroup::{AlternativeSet, Selector};
use crate::record::Record;
use crate::transform::{TransformInput, TransformOutcome, TransformRegistry, ValueTransform};
use crate::visitor::{ElementVisitor, EventRecorder, ProcessEvent};
use indexmap::IndexMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Element flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Single text value
    Scalar,
    /// Named children
    Composite,
    /// One-of-many plugin slot
    Optigroup,
}

/// Value held by a scalar
///
/// `Absent` is never serialized; `Null` is serialized as an explicit null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Value {
    /// Never set
    #[default]
    Absent,
    /// Explicit null
    Null,
    /// Text
    Text(String),
}

impl Value {
    /// `Some` → text, `None` → null
    #[inline]
    #[must_use]
    pub fn from_option(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }

    /// Whether no value was ever set
    #[inline]
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Text, if any
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    /// `None` when absent, `Some(None)` when null
    #[inline]
    #[must_use]
    pub fn as_slot(&self) -> Option<Option<&str>> {
        match self {
            Self::Absent => None,
            Self::Null => Some(None),
            Self::Text(t) => Some(Some(t)),
        }
    }
}

/// Node of an element tree
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    body: Body,
}

#[derive(Debug, Clone)]
enum Body {
    Scalar(Scalar),
    Composite(Composite),
    Optigroup(Optigroup),
}

#[derive(Debug, Clone, Default)]
struct Scalar {
    parent: String,
    value: Value,
    requires_transform: bool,
    transform: Option<Arc<dyn ValueTransform>>,
}

#[derive(Debug, Clone, Default)]
struct Composite {
    children: IndexMap<String, Element>,
    // `Some` for repeated composites: `children` is then only the template.
    instances: Option<Vec<Element>>,
}

#[derive(Clone)]
struct Optigroup {
    alternatives: AlternativeSet,
    selector: Option<Selector>,
    resolved: Option<Box<Element>>,
    transforms: Option<Arc<TransformRegistry>>,
}

impl Debug for Optigroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optigroup")
            .field("alternatives", &self.alternatives.names())
            .field("has_selector", &self.selector.is_some())
            .field("resolved", &self.resolved)
            .finish()
    }
}

fn check_name(name: &str) -> Result<(), StructureError> {
    if name.is_empty() || name.contains('/') {
        return Err(StructureError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Element {
    /// Scalar element
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: Body::Scalar(Scalar::default()),
        }
    }

    /// Scalar that must have a transform bound before it can take values
    #[must_use]
    pub fn transformed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: Body::Scalar(Scalar {
                requires_transform: true,
                ..Scalar::default()
            }),
        }
    }

    /// Composite element with `children` in order
    ///
    /// # Errors
    /// Invalid names or duplicate child names
    pub fn composite(name: impl Into<String>, children: Vec<Element>) -> Result<Self, StructureError> {
        Self::build_composite(name.into(), children, None)
    }

    /// Composite emitted once per filled instance
    ///
    /// # Errors
    /// Invalid names or duplicate child names
    pub fn repeated(name: impl Into<String>, children: Vec<Element>) -> Result<Self, StructureError> {
        Self::build_composite(name.into(), children, Some(Vec::new()))
    }

    /// Optigroup slot over `alternatives`, resolved with `selector`
    #[must_use]
    pub fn optigroup(
        name: impl Into<String>,
        alternatives: AlternativeSet,
        selector: Option<Selector>,
    ) -> Self {
        Self {
            name: name.into(),
            body: Body::Optigroup(Optigroup {
                alternatives,
                selector,
                resolved: None,
                transforms: None,
            }),
        }
    }

    /// Generic definition by kind
    ///
    /// # Errors
    /// Children given for a scalar or optigroup, invalid or duplicate names
    pub fn define(
        name: impl Into<String>,
        kind: ElementKind,
        children: Vec<Element>,
    ) -> Result<Self, StructureError> {
        let name = name.into();
        check_name(&name)?;
        match kind {
            ElementKind::Composite => Self::composite(name, children),
            _ if !children.is_empty() => Err(StructureError::NotComposite(name)),
            ElementKind::Scalar => Ok(Self::scalar(name)),
            ElementKind::Optigroup => Ok(Self::optigroup(name, AlternativeSet::new(), None)),
        }
    }

    fn build_composite(
        name: String,
        children: Vec<Element>,
        instances: Option<Vec<Element>>,
    ) -> Result<Self, StructureError> {
        check_name(&name)?;
        let mut element = Self {
            name,
            body: Body::Composite(Composite {
                children: IndexMap::new(),
                instances,
            }),
        };
        for child in children {
            element.add_child(child)?;
        }
        Ok(element)
    }

    /// Element name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element flavour
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self.body {
            Body::Scalar(_) => ElementKind::Scalar,
            Body::Composite(_) => ElementKind::Composite,
            Body::Optigroup(_) => ElementKind::Optigroup,
        }
    }

    /// Whether this is a repeated composite
    #[must_use]
    pub fn is_repeated(&self) -> bool {
        matches!(&self.body, Body::Composite(c) if c.instances.is_some())
    }

    /// Append a child to a composite
    ///
    /// On a repeated composite the child joins the template and every
    /// existing instance.
    ///
    /// # Errors
    /// Not a composite, invalid name, or a sibling with the same name exists
    pub fn add_child(&mut self, mut child: Element) -> Result<(), StructureError> {
        check_name(&child.name)?;
        let Body::Composite(composite) = &mut self.body else {
            return Err(StructureError::NotComposite(self.name.clone()));
        };
        if composite.children.contains_key(&child.name) {
            return Err(StructureError::DuplicateChild {
                parent: self.name.clone(),
                name: child.name,
            });
        }
        if let Body::Scalar(scalar) = &mut child.body {
            scalar.parent.clone_from(&self.name);
        }
        if let Some(instances) = &mut composite.instances {
            for instance in instances.iter_mut() {
                instance.add_child(child.clone())?;
            }
        }
        composite.children.insert(child.name.clone(), child);
        Ok(())
    }

    /// Direct child (template child for repeated composites)
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        match &self.body {
            Body::Composite(c) => c.children.get(name),
            _ => None,
        }
    }

    /// Mutable direct child
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        match &mut self.body {
            Body::Composite(c) => c.children.get_mut(name),
            _ => None,
        }
    }

    /// Children in insertion order
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        let children = match &self.body {
            Body::Composite(c) => Some(c.children.values()),
            _ => None,
        };
        children.into_iter().flatten()
    }

    /// Follow `segments` through composite children
    #[must_use]
    pub fn descend(&self, segments: &[String]) -> Option<&Element> {
        segments
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Mutable form of [`descend`](Self::descend)
    pub fn descend_mut(&mut self, segments: &[String]) -> Option<&mut Element> {
        let mut node = self;
        for segment in segments {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }

    /// Scalar value, `None` for other kinds
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            Body::Scalar(s) => Some(&s.value),
            _ => None,
        }
    }

    /// Text of a direct scalar child
    #[must_use]
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(Element::value).and_then(Value::as_str)
    }

    /// Store a value on a scalar, running its transform first
    ///
    /// A transform may suppress the write, leaving the scalar absent.
    ///
    /// # Errors
    /// Not a scalar, a required transform is unbound, or the transform fails
    pub fn set_value(&mut self, raw: Option<String>, ctx: &ProcessContext) -> Result<(), ElementError> {
        self.assign(raw.as_deref(), None, ctx)
    }

    /// Store a value verbatim, bypassing transforms (restore side)
    ///
    /// # Errors
    /// Not a scalar
    pub fn load_value(&mut self, value: Value) -> Result<(), ElementError> {
        let Body::Scalar(scalar) = &mut self.body else {
            return Err(ElementError::NotScalar(self.name.clone()));
        };
        scalar.value = value;
        Ok(())
    }

    fn assign(
        &mut self,
        raw: Option<&str>,
        record: Option<&Record>,
        ctx: &ProcessContext,
    ) -> Result<(), ElementError> {
        let Body::Scalar(scalar) = &mut self.body else {
            return Err(ElementError::NotScalar(self.name.clone()));
        };
        let Some(transform) = scalar.transform.clone() else {
            if scalar.requires_transform {
                return Err(StructureError::MissingTransform {
                    parent: scalar.parent.clone(),
                    field: self.name.clone(),
                }
                .into());
            }
            scalar.value = Value::from_option(raw.map(str::to_string));
            return Ok(());
        };

        let input = TransformInput {
            parent: &scalar.parent,
            field: &self.name,
            raw,
            record,
            ctx,
        };
        let outcome = transform
            .apply(&input)
            .map_err(|source| ElementError::Transform {
                parent: scalar.parent.clone(),
                field: self.name.clone(),
                source,
            })?;
        scalar.value = match outcome {
            TransformOutcome::Store(value) => Value::from_option(value),
            TransformOutcome::Suppress => Value::Absent,
        };
        Ok(())
    }

    /// Dispatch a record's fields to same-named scalar children
    ///
    /// Optigroup children are resolved and filled from the same record.
    /// Record fields with no matching element are ignored; elements with no
    /// matching field keep their current value. Composite children are not
    /// touched: they are filled from their own records.
    ///
    /// # Errors
    /// Not a non-repeated composite, or a transform fails
    pub fn fill_values(&mut self, record: &Record, ctx: &ProcessContext) -> Result<(), ElementError> {
        self.fill_inner(record, ctx, &mut Vec::new())
    }

    /// Like [`fill_values`](Self::fill_values) but only direct scalar
    /// children; optigroups are left alone
    ///
    /// # Errors
    /// Not a composite, or a transform fails
    pub fn fill_scalars(&mut self, record: &Record, ctx: &ProcessContext) -> Result<(), ElementError> {
        let Body::Composite(composite) = &mut self.body else {
            return Err(StructureError::NotComposite(self.name.clone()).into());
        };
        for child in composite.children.values_mut() {
            if child.kind() == ElementKind::Scalar {
                if let Some(slot) = record.slot(&child.name) {
                    child.assign(slot, Some(record), ctx)?;
                }
            }
        }
        Ok(())
    }

    fn fill_inner(
        &mut self,
        record: &Record,
        ctx: &ProcessContext,
        chain: &mut Vec<String>,
    ) -> Result<(), ElementError> {
        let Body::Composite(composite) = &mut self.body else {
            return Err(StructureError::NotComposite(self.name.clone()).into());
        };
        if composite.instances.is_some() {
            return Err(StructureError::Repeated(self.name.clone()).into());
        }
        for child in composite.children.values_mut() {
            match child.kind() {
                ElementKind::Scalar => {
                    if let Some(slot) = record.slot(&child.name) {
                        child.assign(slot, Some(record), ctx)?;
                    }
                }
                ElementKind::Optigroup => {
                    chain.push(child.name.clone());
                    if let Some(resolved) = child.resolve_inner(ctx, &chain[..chain.len() - 1])? {
                        resolved.fill_inner(record, ctx, chain)?;
                    }
                    chain.pop();
                }
                ElementKind::Composite => {}
            }
        }
        Ok(())
    }

    /// Fill a new instance of a repeated composite from `record`
    ///
    /// The instance is only appended once filling succeeded.
    ///
    /// # Errors
    /// Not repeated, or filling fails
    pub fn add_instance(&mut self, record: &Record, ctx: &ProcessContext) -> Result<&mut Element, ElementError> {
        let mut instance = self.blank_instance()?;
        instance.fill_values(record, ctx)?;
        Ok(self.append_instance(instance)?)
    }

    /// Append an unfilled instance (restore side)
    ///
    /// # Errors
    /// Not repeated
    pub fn push_instance(&mut self) -> Result<&mut Element, StructureError> {
        let instance = self.blank_instance()?;
        self.append_instance(instance)
    }

    fn blank_instance(&self) -> Result<Element, StructureError> {
        match &self.body {
            Body::Composite(c) if c.instances.is_some() => Ok(Element {
                name: self.name.clone(),
                body: Body::Composite(Composite {
                    children: c.children.clone(),
                    instances: None,
                }),
            }),
            Body::Composite(_) => Err(StructureError::NotRepeated(self.name.clone())),
            _ => Err(StructureError::NotComposite(self.name.clone())),
        }
    }

    fn append_instance(&mut self, instance: Element) -> Result<&mut Element, StructureError> {
        match &mut self.body {
            Body::Composite(Composite {
                instances: Some(list),
                ..
            }) => {
                let index = list.len();
                list.push(instance);
                Ok(&mut list[index])
            }
            _ => Err(StructureError::NotRepeated(self.name.clone())),
        }
    }

    /// Filled instances of a repeated composite (empty otherwise)
    #[must_use]
    pub fn instances(&self) -> &[Element] {
        match &self.body {
            Body::Composite(Composite {
                instances: Some(list),
                ..
            }) => list,
            _ => &[],
        }
    }

    /// Mutable instances
    pub fn instances_mut(&mut self) -> &mut [Element] {
        match &mut self.body {
            Body::Composite(Composite {
                instances: Some(list),
                ..
            }) => list,
            _ => &mut [],
        }
    }

    /// Resolve an optigroup through its selector
    ///
    /// Returns `None` (not an error) when the selector yields nothing or no
    /// alternative applies. Already-resolved groups are returned as they are.
    ///
    /// # Errors
    /// The chosen alternative's tree is malformed
    pub fn resolve(&mut self, ctx: &ProcessContext) -> Result<Option<&mut Element>, StructureError> {
        self.resolve_inner(ctx, &[])
    }

    fn resolve_inner(
        &mut self,
        ctx: &ProcessContext,
        chain: &[String],
    ) -> Result<Option<&mut Element>, StructureError> {
        let Body::Optigroup(group) = &mut self.body else {
            return Ok(None);
        };
        if chain.contains(&self.name) {
            return Err(StructureError::CyclicOptigroup(self.name.clone()));
        }
        if group.resolved.is_none() {
            let Some(selector) = group.selector.as_ref().and_then(|s| s(ctx)) else {
                return Ok(None);
            };
            let Some(alternative) = group.alternatives.select(&selector) else {
                tracing::debug!(optigroup = %self.name, %selector, "no alternative applies");
                return Ok(None);
            };
            let mut element = alternative.element()?;
            if let Some(registry) = &group.transforms {
                element.bind_transforms(registry)?;
            }
            group.resolved = Some(Box::new(element));
        }
        Ok(group.resolved.as_deref_mut())
    }

    /// Resolve an optigroup to the alternative whose tree is named
    /// `element_name`
    ///
    /// With a selector, only the selected alternative is accepted; without
    /// one, alternatives are tried in registration order. `None` means the
    /// named structure cannot live in this slot.
    ///
    /// # Errors
    /// An alternative's tree is malformed
    pub fn resolve_as(
        &mut self,
        element_name: &str,
        ctx: &ProcessContext,
    ) -> Result<Option<&mut Element>, StructureError> {
        let Body::Optigroup(group) = &mut self.body else {
            return Ok(None);
        };
        if group.resolved.is_none() {
            let candidates: Vec<_> = match group.selector.as_ref().and_then(|s| s(ctx)) {
                Some(selector) => group.alternatives.select(&selector).into_iter().collect(),
                None if group.selector.is_some() => Vec::new(),
                None => group.alternatives.iter().collect(),
            };
            for alternative in candidates {
                let mut element = alternative.element()?;
                if element.name != element_name {
                    continue;
                }
                if let Some(registry) = &group.transforms {
                    element.bind_transforms(registry)?;
                }
                group.resolved = Some(Box::new(element));
                break;
            }
        }
        Ok(group
            .resolved
            .as_deref_mut()
            .filter(|resolved| resolved.name == element_name))
    }

    /// Resolved alternative of an optigroup
    #[must_use]
    pub fn resolved(&self) -> Option<&Element> {
        match &self.body {
            Body::Optigroup(g) => g.resolved.as_deref(),
            _ => None,
        }
    }

    /// Mutable resolved alternative
    pub fn resolved_mut(&mut self) -> Option<&mut Element> {
        match &mut self.body {
            Body::Optigroup(g) => g.resolved.as_deref_mut(),
            _ => None,
        }
    }

    /// Attach transforms from `registry` to every scalar, by parent and name
    ///
    /// Optigroups remember the registry and bind alternatives as they
    /// resolve.
    ///
    /// # Errors
    /// [`StructureError::MissingTransform`] for a transformed scalar without
    /// a registered transform
    pub fn bind_transforms(&mut self, registry: &Arc<TransformRegistry>) -> Result<(), StructureError> {
        match &mut self.body {
            Body::Scalar(scalar) => {
                if let Some(transform) = registry.get(&scalar.parent, &self.name) {
                    scalar.transform = Some(transform);
                } else if scalar.requires_transform {
                    return Err(StructureError::MissingTransform {
                        parent: scalar.parent.clone(),
                        field: self.name.clone(),
                    });
                }
            }
            Body::Composite(composite) => {
                for child in composite.children.values_mut() {
                    child.bind_transforms(registry)?;
                }
                for instance in composite.instances.iter_mut().flatten() {
                    instance.bind_transforms(registry)?;
                }
            }
            Body::Optigroup(group) => {
                group.transforms = Some(Arc::clone(registry));
                if let Some(resolved) = &mut group.resolved {
                    resolved.bind_transforms(registry)?;
                }
            }
        }
        Ok(())
    }

    /// Flat record of this composite's scalar values
    ///
    /// Mirrors [`fill_values`](Self::fill_values): direct scalars plus the
    /// scalars of resolved optigroups. Absent values are left out.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let mut record = Record::new();
        self.collect(&mut record, true);
        record
    }

    /// Record of direct scalar children only
    #[must_use]
    pub fn scalar_record(&self) -> Record {
        let mut record = Record::new();
        self.collect(&mut record, false);
        record
    }

    fn collect(&self, record: &mut Record, optigroups: bool) {
        for child in self.children() {
            match &child.body {
                Body::Scalar(s) => {
                    if let Some(slot) = s.value.as_slot() {
                        record.set(child.name.clone(), slot.map(str::to_string));
                    }
                }
                Body::Optigroup(g) if optigroups => {
                    if let Some(resolved) = &g.resolved {
                        resolved.collect(record, true);
                    }
                }
                Body::Optigroup(_) | Body::Composite(_) => {}
            }
        }
    }

    /// Walk the tree in order, handing every element to `visitor`
    ///
    /// Composites open and close a group (even when empty); repeated
    /// composites emit one group per instance; scalars emit a leaf unless
    /// absent; optigroups open a group around their resolved alternative,
    /// or around nothing when no alternative applies.
    ///
    /// # Errors
    /// The visitor fails or an optigroup resolves into itself
    pub fn process<V: ElementVisitor>(
        &self,
        visitor: &mut V,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessError<V::Error>> {
        self.walk(visitor, ctx, &mut Vec::new())
    }

    fn walk<V: ElementVisitor>(
        &self,
        visitor: &mut V,
        ctx: &ProcessContext,
        chain: &mut Vec<String>,
    ) -> Result<(), ProcessError<V::Error>> {
        match &self.body {
            Body::Scalar(scalar) => {
                if let Some(slot) = scalar.value.as_slot() {
                    visitor.leaf(&self.name, slot).map_err(ProcessError::Visitor)?;
                }
            }
            Body::Composite(Composite {
                instances: Some(list),
                ..
            }) => {
                for instance in list {
                    instance.walk(visitor, ctx, chain)?;
                }
            }
            Body::Composite(composite) => {
                visitor.open(&self.name).map_err(ProcessError::Visitor)?;
                for child in composite.children.values() {
                    child.walk(visitor, ctx, chain)?;
                }
                visitor.close(&self.name).map_err(ProcessError::Visitor)?;
            }
            Body::Optigroup(group) => {
                if chain.contains(&self.name) {
                    return Err(StructureError::CyclicOptigroup(self.name.clone()).into());
                }
                visitor.open(&self.name).map_err(ProcessError::Visitor)?;
                chain.push(self.name.clone());
                if let Some(resolved) = &group.resolved {
                    resolved.walk(visitor, ctx, chain)?;
                } else if let Some(alternative) = group
                    .selector
                    .as_ref()
                    .and_then(|s| s(ctx))
                    .and_then(|selector| group.alternatives.select(&selector).cloned())
                {
                    alternative.element()?.walk(visitor, ctx, chain)?;
                }
                chain.pop();
                visitor.close(&self.name).map_err(ProcessError::Visitor)?;
            }
        }
        Ok(())
    }

    /// Event sequence of [`process`](Self::process)
    ///
    /// # Errors
    /// An optigroup resolves into itself
    pub fn events(&self, ctx: &ProcessContext) -> Result<Vec<ProcessEvent>, StructureError> {
        let mut recorder = EventRecorder::new();
        match self.process(&mut recorder, ctx) {
            Ok(()) => Ok(recorder.into_events()),
            Err(ProcessError::Structure(e)) => Err(e),
            Err(ProcessError::Visitor(never)) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optigroup::{fixed_selector, FnAlternative};
    use crate::transform::{Anonymize, AnonymizeTransform, ValueTransform};
    use crate::ElementPath;
    use pretty_assertions::assert_eq;
    use ProcessEvent::{Close, Leaf, Open};

    fn open(n: &str) -> ProcessEvent {
        Open(n.to_string())
    }
    fn close(n: &str) -> ProcessEvent {
        Close(n.to_string())
    }
    fn leaf(n: &str, v: &str) -> ProcessEvent {
        Leaf(n.to_string(), Some(v.to_string()))
    }

    fn forum() -> Element {
        Element::composite(
            "forum",
            vec![
                Element::scalar("id"),
                Element::scalar("name"),
                Element::composite(
                    "discussions",
                    vec![Element::repeated("discussion", vec![Element::scalar("id"), Element::scalar("subject")]).unwrap()],
                )
                .unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_child_rejected() {
        let err = Element::composite("course", vec![Element::scalar("id"), Element::scalar("id")]).unwrap_err();
        assert_eq!(
            err,
            StructureError::DuplicateChild {
                parent: "course".to_string(),
                name: "id".to_string()
            }
        );
    }

    #[test]
    fn define_rejects_children_on_scalar() {
        let err = Element::define("id", ElementKind::Scalar, vec![Element::scalar("x")]).unwrap_err();
        assert_eq!(err, StructureError::NotComposite("id".to_string()));
        let ok = Element::define("course", ElementKind::Composite, vec![Element::scalar("id")]).unwrap();
        assert_eq!(ok.kind(), ElementKind::Composite);
    }

    #[test]
    fn fill_ignores_unknown_fields_and_keeps_unmatched_absent() {
        let ctx = ProcessContext::detached();
        let mut f = forum();
        f.fill_values(&Record::new().with("id", 3).with("unknown", "x"), &ctx).unwrap();
        assert_eq!(f.child_text("id"), Some("3"));
        assert!(f.child("name").unwrap().value().unwrap().is_absent());
        assert_eq!(
            f.events(&ctx).unwrap(),
            vec![open("forum"), leaf("id", "3"), open("discussions"), close("discussions"), close("forum")]
        );
    }

    #[test]
    fn null_is_emitted_absent_is_not() {
        let ctx = ProcessContext::detached();
        let mut f = forum();
        f.fill_values(&Record::new().with_null("name"), &ctx).unwrap();
        let events = f.events(&ctx).unwrap();
        assert!(events.contains(&Leaf("name".to_string(), None)));
        assert!(!events.iter().any(|e| matches!(e, Leaf(n, _) if n == "id")));
    }

    #[test]
    fn repeated_instances_emit_in_order() {
        let ctx = ProcessContext::detached();
        let mut f = forum();
        let path: ElementPath = "forum/discussions/discussion".parse().unwrap();
        let discussions = f.descend_mut(&path.segments()[1..]).unwrap();
        discussions.add_instance(&Record::new().with("id", 1).with("subject", "Welcome"), &ctx).unwrap();
        discussions.add_instance(&Record::new().with("id", 2), &ctx).unwrap();
        assert_eq!(discussions.instances().len(), 2);

        assert_eq!(
            f.events(&ctx).unwrap(),
            vec![
                open("forum"),
                open("discussions"),
                open("discussion"),
                leaf("id", "1"),
                leaf("subject", "Welcome"),
                close("discussion"),
                open("discussion"),
                leaf("id", "2"),
                close("discussion"),
                close("discussions"),
                close("forum"),
            ]
        );
    }

    #[test]
    fn fill_on_repeated_is_rejected() {
        let ctx = ProcessContext::detached();
        let mut r = Element::repeated("post", vec![Element::scalar("id")]).unwrap();
        assert!(r.fill_values(&Record::new(), &ctx).is_err());
        let mut c = Element::composite("post", vec![]).unwrap();
        assert!(c.push_instance().is_err());
    }

    fn format_options() -> Element {
        let set = AlternativeSet::new()
            .with(Arc::new(FnAlternative::new("topics", || {
                Element::composite("topics_options", vec![Element::scalar("layout")])
            })))
            .unwrap()
            .with(Arc::new(FnAlternative::new("weeks", || {
                Element::composite("weeks_options", vec![Element::scalar("automaticenddate")])
            })))
            .unwrap();
        Element::optigroup("format_options", set, Some(fixed_selector("weeks")))
    }

    #[test]
    fn optigroup_filled_from_parent_record() {
        let ctx = ProcessContext::detached();
        let mut section = Element::composite("section", vec![Element::scalar("id"), format_options()]).unwrap();
        section
            .fill_values(&Record::new().with("id", 5).with("automaticenddate", 1).with("layout", 2), &ctx)
            .unwrap();
        assert_eq!(
            section.events(&ctx).unwrap(),
            vec![
                open("section"),
                leaf("id", "5"),
                open("format_options"),
                open("weeks_options"),
                leaf("automaticenddate", "1"),
                close("weeks_options"),
                close("format_options"),
                close("section"),
            ]
        );
        let record = section.to_record();
        assert_eq!(record.get("automaticenddate"), Some("1"));
        assert_eq!(record.get("layout"), None);
    }

    #[test]
    fn optigroup_without_match_is_empty_group() {
        let ctx = ProcessContext::detached();
        let mut group = Element::optigroup("format_options", AlternativeSet::new(), Some(fixed_selector("grid")));
        assert!(group.resolve(&ctx).unwrap().is_none());
        assert_eq!(group.events(&ctx).unwrap(), vec![open("format_options"), close("format_options")]);
    }

    #[test]
    fn resolve_as_respects_selector() {
        let ctx = ProcessContext::detached();
        let mut group = format_options();
        assert!(group.resolve_as("topics_options", &ctx).unwrap().is_none());
        assert!(group.resolve_as("weeks_options", &ctx).unwrap().is_some());
    }

    #[test]
    fn cyclic_optigroup_detected() {
        fn looping() -> Result<Element, StructureError> {
            let set = AlternativeSet::new()
                .with(Arc::new(FnAlternative::new("self", looping_inner)))
                .unwrap();
            Element::composite("wrapper", vec![Element::optigroup("slot", set, Some(fixed_selector("self")))])
        }
        fn looping_inner() -> Result<Element, StructureError> {
            looping()
        }
        let ctx = ProcessContext::detached();
        let mut root = looping().unwrap();
        let err = root.fill_values(&Record::new(), &ctx).unwrap_err();
        assert!(matches!(err, ElementError::Structure(StructureError::CyclicOptigroup(_))));
        let fresh = looping().unwrap();
        assert!(matches!(fresh.events(&ctx), Err(StructureError::CyclicOptigroup(_))));
    }

    #[derive(Debug)]
    struct Suppressing;

    impl ValueTransform for Suppressing {
        fn apply(&self, _input: &TransformInput<'_>) -> Result<TransformOutcome, crate::TransformError> {
            Ok(TransformOutcome::Suppress)
        }
    }

    #[test]
    fn transforms_bound_by_parent_and_field() {
        let ctx = ProcessContext::detached().with_anonymize(true);
        let mut registry = TransformRegistry::new();
        registry
            .register("user", "username", Arc::new(AnonymizeTransform::new(Anonymize::Prefixed("anon".into()))))
            .unwrap();
        registry.register("file", "content", Arc::new(Suppressing)).unwrap();
        let registry = Arc::new(registry);

        let mut user = Element::composite("user", vec![Element::scalar("id"), Element::transformed("username")]).unwrap();
        user.bind_transforms(&registry).unwrap();
        user.fill_values(&Record::new().with("id", 9).with("username", "ada"), &ctx).unwrap();
        assert_eq!(user.child_text("username"), Some("anon9"));

        let mut file = Element::composite("file", vec![Element::transformed("content")]).unwrap();
        file.bind_transforms(&registry).unwrap();
        file.fill_values(&Record::new().with("content", "bytes"), &ctx).unwrap();
        assert!(file.child("content").unwrap().value().unwrap().is_absent());
    }

    #[test]
    fn unbound_required_transform_is_a_definition_error() {
        let mut user = Element::composite("user", vec![Element::transformed("email")]).unwrap();
        let err = user.bind_transforms(&Arc::new(TransformRegistry::new())).unwrap_err();
        assert_eq!(
            err,
            StructureError::MissingTransform {
                parent: "user".to_string(),
                field: "email".to_string()
            }
        );
    }
}
