//! Declarative activity and block plugins

use crate::links::LinkRule;
use cbr_element::{Alternative, Element, ElementKind, ElementPath, StructureError};
use std::fmt;
use std::sync::Arc;

/// What a content plugin extends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Course module type
    Activity,
    /// Block type
    Block,
}

/// How rows of a source relate to the enclosing row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLink {
    /// The activity's own instance row, fetched by the module's `instance`
    Instance,
    /// Rows whose field holds the enclosing row's id (the block instance id
    /// for a block's root source)
    Parent(String),
}

/// Foreign key remapped through the id map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field holding the old id
    pub field: String,
    /// Item type the id belongs to
    pub itemtype: String,
}

/// Where the rows of one composite come from and how they are restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySource {
    /// Composite path from the plugin root, root name included
    pub path: ElementPath,
    /// Entity table
    pub entity: String,
    /// Id-map item type of the rows
    pub itemtype: String,
    /// Relation to the enclosing row
    pub link: SourceLink,
    /// Remapped when the row is inserted
    pub references: Vec<Reference>,
    /// Remapped in the after-restore pass
    pub deferred: Vec<Reference>,
    /// Rich-text fields carrying content links
    pub encoded: Vec<String>,
    /// Rows are user data, skipped when users are excluded
    pub user_data: bool,
}

impl EntitySource {
    /// Source for the composite at slash path `path`
    #[must_use]
    pub fn new(path: &str, entity: impl Into<String>, itemtype: impl Into<String>, link: SourceLink) -> Self {
        Self {
            path: ElementPath::new(path.split('/').map(str::to_string).collect()),
            entity: entity.into(),
            itemtype: itemtype.into(),
            link,
            references: Vec::new(),
            deferred: Vec::new(),
            encoded: Vec::new(),
            user_data: false,
        }
    }

    /// Field remapped at insert time
    #[must_use]
    pub fn reference(mut self, field: impl Into<String>, itemtype: impl Into<String>) -> Self {
        self.references.push(Reference {
            field: field.into(),
            itemtype: itemtype.into(),
        });
        self
    }

    /// Field remapped after every task has run
    #[must_use]
    pub fn deferred(mut self, field: impl Into<String>, itemtype: impl Into<String>) -> Self {
        self.deferred.push(Reference {
            field: field.into(),
            itemtype: itemtype.into(),
        });
        self
    }

    /// Rich-text field whose links are encoded
    #[must_use]
    pub fn encoded(mut self, field: impl Into<String>) -> Self {
        self.encoded.push(field.into());
        self
    }

    /// Mark rows as user data
    #[inline]
    #[must_use]
    pub fn user_data(mut self) -> Self {
        self.user_data = true;
        self
    }

    /// Name of the composite the rows fill
    #[must_use]
    pub fn element_name(&self) -> &str {
        self.path.last().unwrap_or_default()
    }

    /// References of every item type, immediate then deferred
    pub fn all_references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter().chain(&self.deferred)
    }
}

/// File area owned by a plugin or by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArea {
    /// Component, e.g. `mod_forum`
    pub component: String,
    /// Area name, e.g. `attachment`
    pub filearea: String,
    /// Item type of the descriptor's `itemid`; `None` keeps it as is
    pub itemtype: Option<String>,
}

impl FileArea {
    /// Area whose `itemid` is kept
    #[must_use]
    pub fn new(component: impl Into<String>, filearea: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            filearea: filearea.into(),
            itemtype: None,
        }
    }

    /// Area whose `itemid` is a row of `itemtype`
    #[must_use]
    pub fn owned_by(mut self, itemtype: impl Into<String>) -> Self {
        self.itemtype = Some(itemtype.into());
        self
    }

    /// Whether a descriptor lives in this area
    #[must_use]
    pub fn matches(&self, component: &str, filearea: &str) -> bool {
        self.component == component && self.filearea == filearea
    }
}

type Builder = Arc<dyn Fn() -> Result<Element, StructureError> + Send + Sync>;

/// Activity or block type described by data
///
/// The plugin contributes an element subtree for its unit's optigroup slot
/// and says, per composite of that subtree, which entity rows fill it.
#[derive(Clone)]
pub struct ContentPlugin {
    name: String,
    kind: PluginKind,
    build: Builder,
    sources: Vec<EntitySource>,
    file_areas: Vec<FileArea>,
    link_rules: Vec<LinkRule>,
}

impl fmt::Debug for ContentPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentPlugin")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("sources", &self.sources.len())
            .field("file_areas", &self.file_areas)
            .finish_non_exhaustive()
    }
}

impl ContentPlugin {
    fn new<F>(name: impl Into<String>, kind: PluginKind, build: F) -> Self
    where
        F: Fn() -> Result<Element, StructureError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            build: Arc::new(build),
            sources: Vec::new(),
            file_areas: Vec::new(),
            link_rules: Vec::new(),
        }
    }

    /// Activity plugin `name` (module name, e.g. `forum`)
    pub fn activity<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<Element, StructureError> + Send + Sync + 'static,
    {
        Self::new(name, PluginKind::Activity, build)
    }

    /// Block plugin `name` (block name, e.g. `html`)
    pub fn block<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<Element, StructureError> + Send + Sync + 'static,
    {
        Self::new(name, PluginKind::Block, build)
    }

    /// Add a row source; the first one must be the subtree root
    #[must_use]
    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.sources.push(source);
        self
    }

    /// Add a file area under this plugin's component
    #[must_use]
    pub fn with_file_area(mut self, filearea: impl Into<String>, itemtype: Option<&str>) -> Self {
        let mut area = FileArea::new(self.component(), filearea);
        area.itemtype = itemtype.map(str::to_string);
        self.file_areas.push(area);
        self
    }

    /// Add a content link rule
    #[must_use]
    pub fn with_link_rule(mut self, rule: LinkRule) -> Self {
        self.link_rules.push(rule);
        self
    }

    /// Plugin name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Activity or block
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// File component, `mod_<name>` or `block_<name>`
    #[must_use]
    pub fn component(&self) -> String {
        match self.kind {
            PluginKind::Activity => format!("mod_{}", self.name),
            PluginKind::Block => format!("block_{}", self.name),
        }
    }

    /// Row sources, root first
    #[must_use]
    pub fn sources(&self) -> &[EntitySource] {
        &self.sources
    }

    /// Root source
    #[must_use]
    pub fn root_source(&self) -> Option<&EntitySource> {
        self.sources.first()
    }

    /// Index of the nearest source enclosing source `index`
    pub(crate) fn parent_of(&self, index: usize) -> Option<usize> {
        let path = &self.sources.get(index)?.path;
        self.sources[..index]
            .iter()
            .enumerate()
            .filter(|(_, s)| s.path.is_ancestor_of(path))
            .max_by_key(|(_, s)| s.path.len())
            .map(|(i, _)| i)
    }

    /// File areas
    #[must_use]
    pub fn file_areas(&self) -> &[FileArea] {
        &self.file_areas
    }

    /// Extra link rules
    #[must_use]
    pub fn link_rules(&self) -> &[LinkRule] {
        &self.link_rules
    }

    /// Fresh subtree
    ///
    /// # Errors
    /// The builder's tree is malformed
    pub fn build(&self) -> Result<Element, StructureError> {
        (self.build)()
    }

    /// Check that sources line up with the subtree
    ///
    /// # Errors
    /// Missing root source, a source path that is not a composite of the
    /// tree, or a nested source that is not repeated
    pub fn validate(&self) -> Result<(), StructureError> {
        let tree = self.build()?;
        let root = self
            .root_source()
            .ok_or_else(|| StructureError::InvalidName(format!("{}: no root source", self.name)))?;
        if root.path.segments() != [tree.name().to_string()] {
            return Err(StructureError::InvalidName(root.path.to_string()));
        }
        match (self.kind, &root.link) {
            (PluginKind::Activity, SourceLink::Instance) | (PluginKind::Block, SourceLink::Parent(_)) => {}
            (PluginKind::Activity, _) => {
                return Err(StructureError::InvalidName(format!("{}: root must link by instance", self.name)));
            }
            (PluginKind::Block, _) => {
                return Err(StructureError::InvalidName(format!("{}: root must link to the block", self.name)));
            }
        }
        for (index, source) in self.sources.iter().enumerate().skip(1) {
            let element = tree
                .descend(&source.path.segments()[1..])
                .filter(|e| e.kind() == ElementKind::Composite)
                .ok_or_else(|| StructureError::NotComposite(source.path.to_string()))?;
            if !element.is_repeated() {
                return Err(StructureError::NotRepeated(source.path.to_string()));
            }
            if self.parent_of(index).is_none() || source.link == SourceLink::Instance {
                return Err(StructureError::InvalidName(source.path.to_string()));
            }
        }
        Ok(())
    }
}

impl Alternative for ContentPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn element(&self) -> Result<Element, StructureError> {
        self.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forum() -> ContentPlugin {
        ContentPlugin::activity("forum", || {
            let post = Element::repeated("post", vec![Element::scalar("id"), Element::scalar("message")])?;
            let discussion = Element::repeated(
                "discussion",
                vec![Element::scalar("id"), Element::composite("posts", vec![post])?],
            )?;
            Element::composite(
                "forum",
                vec![Element::scalar("id"), Element::composite("discussions", vec![discussion])?],
            )
        })
        .with_source(EntitySource::new("forum", "forum", "forum", SourceLink::Instance))
        .with_source(EntitySource::new(
            "forum/discussions/discussion",
            "forum_discussions",
            "forum_discussion",
            SourceLink::Parent("forum".into()),
        ))
        .with_source(EntitySource::new(
            "forum/discussions/discussion/posts/post",
            "forum_posts",
            "forum_post",
            SourceLink::Parent("discussion".into()),
        ))
    }

    #[test]
    fn valid_plugin() {
        let plugin = forum();
        plugin.validate().unwrap();
        assert_eq!(plugin.parent_of(2), Some(1));
        assert_eq!(plugin.parent_of(1), Some(0));
        assert_eq!(plugin.component(), "mod_forum");
    }

    #[test]
    fn source_must_point_at_repeated_composite() {
        let plugin = forum().with_source(EntitySource::new(
            "forum/discussions",
            "forum_x",
            "x",
            SourceLink::Parent("forum".into()),
        ));
        assert!(matches!(plugin.validate(), Err(StructureError::NotRepeated(_))));
    }
}
