//! Course format plugins

use cbr_element::{Alternative, Element, StructureError};

/// Course format contributing per-section options
///
/// The options subtree is named `<format>_options` and holds one scalar per
/// option name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPlugin {
    name: String,
    options: Vec<String>,
}

impl FormatPlugin {
    /// Format `name` with section `options`
    #[must_use]
    pub fn new(name: impl Into<String>, options: &[&str]) -> Self {
        Self {
            name: name.into(),
            options: options.iter().map(|o| (*o).to_string()).collect(),
        }
    }

    /// Format name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Option names
    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Name of the options subtree
    #[must_use]
    pub fn element_name(&self) -> String {
        format!("{}_options", self.name)
    }
}

impl Alternative for FormatPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn element(&self) -> Result<Element, StructureError> {
        Element::composite(
            self.element_name(),
            self.options.iter().map(Element::scalar).collect(),
        )
    }
}
