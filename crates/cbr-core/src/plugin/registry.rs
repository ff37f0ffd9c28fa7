//! Installed plugins

use super::content::{ContentPlugin, FileArea, PluginKind};
use super::format::FormatPlugin;
use crate::ids::itemtype;
use crate::links::LinkRule;
use cbr_element::{Alternative, AlternativeSet, StructureError};
use indexmap::IndexMap;
use std::sync::Arc;

/// Activity, block and format plugins in registration order
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    activities: IndexMap<String, Arc<ContentPlugin>>,
    blocks: IndexMap<String, Arc<ContentPlugin>>,
    formats: IndexMap<String, Arc<FormatPlugin>>,
}

impl PluginRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a content plugin
    ///
    /// # Errors
    /// Name already taken for its kind, or the plugin is inconsistent
    pub fn register(&mut self, plugin: ContentPlugin) -> Result<(), StructureError> {
        plugin.validate()?;
        let map = match plugin.kind() {
            PluginKind::Activity => &mut self.activities,
            PluginKind::Block => &mut self.blocks,
        };
        if map.contains_key(plugin.name()) {
            return Err(StructureError::DuplicateAlternative(plugin.name().to_string()));
        }
        tracing::debug!(plugin = %plugin.name(), kind = ?plugin.kind(), "registered plugin");
        map.insert(plugin.name().to_string(), Arc::new(plugin));
        Ok(())
    }

    /// Register a course format
    ///
    /// # Errors
    /// Name already taken
    pub fn register_format(&mut self, format: FormatPlugin) -> Result<(), StructureError> {
        if self.formats.contains_key(format.name()) {
            return Err(StructureError::DuplicateAlternative(format.name().to_string()));
        }
        self.formats.insert(format.name().to_string(), Arc::new(format));
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    ///
    /// # Errors
    /// See [`register`](Self::register)
    pub fn with(mut self, plugin: ContentPlugin) -> Result<Self, StructureError> {
        self.register(plugin)?;
        Ok(self)
    }

    /// Builder form of [`register_format`](Self::register_format)
    ///
    /// # Errors
    /// See [`register_format`](Self::register_format)
    pub fn with_format(mut self, format: FormatPlugin) -> Result<Self, StructureError> {
        self.register_format(format)?;
        Ok(self)
    }

    /// Activity plugin by module name
    #[must_use]
    pub fn activity(&self, name: &str) -> Option<&Arc<ContentPlugin>> {
        self.activities.get(name)
    }

    /// Block plugin by block name
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&Arc<ContentPlugin>> {
        self.blocks.get(name)
    }

    /// Activity plugins in registration order
    pub fn activities(&self) -> impl Iterator<Item = &Arc<ContentPlugin>> {
        self.activities.values()
    }

    /// Block plugins in registration order
    pub fn blocks(&self) -> impl Iterator<Item = &Arc<ContentPlugin>> {
        self.blocks.values()
    }

    /// Format plugin by name
    #[must_use]
    pub fn format(&self, name: &str) -> Option<&Arc<FormatPlugin>> {
        self.formats.get(name)
    }

    /// Activity plugins as optigroup alternatives
    ///
    /// # Errors
    /// Never in practice; names are unique by construction
    pub fn activity_alternatives(&self) -> Result<AlternativeSet, StructureError> {
        Self::alternatives(self.activities.values().map(|p| Arc::clone(p) as Arc<dyn Alternative>))
    }

    /// Block plugins as optigroup alternatives
    ///
    /// # Errors
    /// Never in practice; names are unique by construction
    pub fn block_alternatives(&self) -> Result<AlternativeSet, StructureError> {
        Self::alternatives(self.blocks.values().map(|p| Arc::clone(p) as Arc<dyn Alternative>))
    }

    /// Format plugins as optigroup alternatives
    ///
    /// # Errors
    /// Never in practice; names are unique by construction
    pub fn format_alternatives(&self) -> Result<AlternativeSet, StructureError> {
        Self::alternatives(self.formats.values().map(|p| Arc::clone(p) as Arc<dyn Alternative>))
    }

    fn alternatives(items: impl Iterator<Item = Arc<dyn Alternative>>) -> Result<AlternativeSet, StructureError> {
        let mut set = AlternativeSet::new();
        for item in items {
            set.register(item)?;
        }
        Ok(set)
    }

    /// Core rules, a view rule per activity, then plugin-declared rules
    #[must_use]
    pub fn link_rules(&self) -> Vec<LinkRule> {
        let mut rules = LinkRule::core();
        for plugin in self.activities.values() {
            rules.push(LinkRule::activity_view(plugin.name()));
        }
        for plugin in self.activities.values().chain(self.blocks.values()) {
            rules.extend(plugin.link_rules().iter().cloned());
        }
        rules
    }

    /// File area a descriptor belongs to, core areas included
    #[must_use]
    pub fn file_area(&self, component: &str, filearea: &str) -> Option<FileArea> {
        core_file_areas()
            .into_iter()
            .chain(
                self.activities
                    .values()
                    .chain(self.blocks.values())
                    .flat_map(|p| p.file_areas().iter().cloned()),
            )
            .find(|area| area.matches(component, filearea))
    }

    /// Every file area, core first
    #[must_use]
    pub fn file_areas(&self) -> Vec<FileArea> {
        let mut areas = core_file_areas();
        for plugin in self.activities.values().chain(self.blocks.values()) {
            areas.extend(plugin.file_areas().iter().cloned());
        }
        areas
    }
}

fn core_file_areas() -> Vec<FileArea> {
    vec![
        FileArea::new("course", "summary"),
        FileArea::new("course", "section").owned_by(itemtype::SECTION),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{EntitySource, SourceLink};
    use cbr_element::Element;

    fn page() -> ContentPlugin {
        ContentPlugin::activity("page", || {
            Element::composite("page", vec![Element::scalar("id"), Element::scalar("content")])
        })
        .with_source(EntitySource::new("page", "page", "page", SourceLink::Instance).encoded("content"))
        .with_file_area("content", None)
    }

    #[test]
    fn duplicates_rejected_per_kind() {
        let mut reg = PluginRegistry::new();
        reg.register(page()).unwrap();
        assert!(matches!(reg.register(page()), Err(StructureError::DuplicateAlternative(_))));
        reg.register_format(FormatPlugin::new("topics", &["layout"])).unwrap();
        assert!(reg.register_format(FormatPlugin::new("topics", &[])).is_err());
    }

    #[test]
    fn alternatives_follow_registration_order() {
        let reg = PluginRegistry::new()
            .with_format(FormatPlugin::new("weeks", &[]))
            .unwrap()
            .with_format(FormatPlugin::new("topics", &[]))
            .unwrap();
        assert_eq!(reg.format_alternatives().unwrap().names(), ["weeks", "topics"]);
    }

    #[test]
    fn view_rule_per_activity() {
        let reg = PluginRegistry::new().with(page()).unwrap();
        let tokens: Vec<_> = reg.link_rules().into_iter().map(|r| r.token).collect();
        assert_eq!(tokens, ["COURSEVIEWBYID", "SECTIONVIEWBYID", "PAGEVIEWBYID"]);
    }

    #[test]
    fn file_areas_include_core() {
        let reg = PluginRegistry::new().with(page()).unwrap();
        assert_eq!(
            reg.file_area("course", "section").unwrap().itemtype.as_deref(),
            Some(itemtype::SECTION)
        );
        assert!(reg.file_area("mod_page", "content").is_some());
        assert!(reg.file_area("mod_quiz", "intro").is_none());
    }
}
