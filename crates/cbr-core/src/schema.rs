//! Core element trees
//!
//! Every unit document has a fixed core shape with plugin slots. Scalar names
//! match entity field names so rows fill trees directly.

use crate::plugin::PluginRegistry;
use cbr_element::{Element, Selector, StructureError};

/// Root of the course document
pub const COURSE: &str = "course";
/// Root of a section document
pub const SECTION: &str = "section";
/// Root of an activity document
pub const ACTIVITY: &str = "activity";
/// Root of a block document
pub const BLOCK: &str = "block";
/// Root of the users document
pub const USERS: &str = "users";
/// Root of the file manifest
pub const FILES: &str = "files";

/// Optigroup slot names
pub mod slot {
    /// Section format options
    pub const FORMAT_OPTIONS: &str = "format_options";
    /// Activity plugin data
    pub const PLUGIN: &str = "plugin";
    /// Block plugin data
    pub const CONFIG: &str = "config";
}

/// Field holding file contents in the manifest
pub const FILE_CONTENT: &str = "content";

fn scalars(names: &[&str]) -> Vec<Element> {
    names.iter().map(|n| Element::scalar(*n)).collect()
}

/// Course row, summary links encoded
///
/// # Errors
/// Never for the built-in shape
pub fn course() -> Result<Element, StructureError> {
    Element::composite(
        COURSE,
        scalars(&["id", "shortname", "fullname", "format", "summary", "startdate", "visible", "contextid"]),
    )
}

/// Section row with its format options slot
///
/// # Errors
/// Registry alternatives clash
pub fn section(plugins: &PluginRegistry, format: Option<Selector>) -> Result<Element, StructureError> {
    let mut children = scalars(&["id", "section", "name", "summary", "visible", "sequence"]);
    children.push(Element::optigroup(slot::FORMAT_OPTIONS, plugins.format_alternatives()?, format));
    Element::composite(SECTION, children)
}

/// Course-module row with the activity plugin slot
///
/// # Errors
/// Registry alternatives clash
pub fn activity(plugins: &PluginRegistry, modulename: Option<Selector>) -> Result<Element, StructureError> {
    let mut children = scalars(&["id", "modulename", "instance", "section", "visible", "idnumber", "contextid"]);
    children.push(Element::optigroup(slot::PLUGIN, plugins.activity_alternatives()?, modulename));
    Element::composite(ACTIVITY, children)
}

/// Block instance row with the block plugin slot
///
/// # Errors
/// Registry alternatives clash
pub fn block(plugins: &PluginRegistry, blockname: Option<Selector>) -> Result<Element, StructureError> {
    let mut children = scalars(&["id", "blockname", "parentcontextid", "region", "weight", "contextid"]);
    children.push(Element::optigroup(slot::CONFIG, plugins.block_alternatives()?, blockname));
    Element::composite(BLOCK, children)
}

/// Users referenced by the course; personal fields need a transform bound
///
/// # Errors
/// Never for the built-in shape
pub fn users() -> Result<Element, StructureError> {
    let user = Element::repeated(
        "user",
        vec![
            Element::scalar("id"),
            Element::transformed("username"),
            Element::transformed("firstname"),
            Element::transformed("lastname"),
            Element::transformed("email"),
        ],
    )?;
    Element::composite(USERS, vec![user])
}

/// Flat file manifest; `content` needs the copying transform on backup
///
/// # Errors
/// Never for the built-in shape
pub fn files() -> Result<Element, StructureError> {
    let mut fields = scalars(&[
        "contextid",
        "component",
        "filearea",
        "itemid",
        "filepath",
        "filename",
        "contenthash",
        "filesize",
        "mimetype",
    ]);
    fields.push(Element::transformed(FILE_CONTENT));
    Element::composite(FILES, vec![Element::repeated("file", fields)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::FormatPlugin;
    use cbr_element::{fixed_selector, ElementKind, ProcessContext, Record};

    #[test]
    fn section_resolves_format_options() {
        let plugins = PluginRegistry::new()
            .with_format(FormatPlugin::new("topics", &["layout"]))
            .unwrap();
        let mut tree = section(&plugins, Some(fixed_selector("topics"))).unwrap();
        let ctx = ProcessContext::detached();
        tree.fill_values(&Record::new().with("id", 3).with("layout", "grid"), &ctx).unwrap();
        let options = tree.child(slot::FORMAT_OPTIONS).unwrap();
        assert_eq!(options.kind(), ElementKind::Optigroup);
        assert_eq!(options.resolved().unwrap().child_text("layout"), Some("grid"));
    }

    #[test]
    fn manifest_requires_content_transform() {
        let mut tree = files().unwrap();
        let ctx = ProcessContext::detached();
        let err = tree
            .child_mut("file")
            .unwrap()
            .add_instance(&Record::new().with("filename", "a.txt").with("content", "x"), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("content"));
    }
}
