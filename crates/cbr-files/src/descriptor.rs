//! File descriptors
//!
//! A [`FileDescriptor`] names one attachment: where it logically lives
//! (context, component, file area, owning item, path, name) and which blob
//! holds its bytes.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};

/// One binary attachment owned by an entity record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Context the file belongs to (course, module, block)
    pub contextid: i64,
    /// Owning component, e.g. `mod_forum`
    pub component: String,
    /// Area within the component, e.g. `attachment`
    pub filearea: String,
    /// Id of the owning entity row; `0` for areas without an owner row
    pub itemid: i64,
    /// Directory path, always starting and ending with `/`
    pub filepath: String,
    /// File name
    pub filename: String,
    /// Hash of the blob
    pub contenthash: ContentHash,
    /// Size in bytes
    #[serde(default)]
    pub filesize: u64,
    /// Optional MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

impl FileDescriptor {
    /// Create a descriptor at the root path `/`
    #[must_use]
    pub fn new(
        contextid: i64,
        component: impl Into<String>,
        filearea: impl Into<String>,
        itemid: i64,
        filename: impl Into<String>,
        contenthash: ContentHash,
    ) -> Self {
        Self {
            contextid,
            component: component.into(),
            filearea: filearea.into(),
            itemid,
            filepath: "/".to_string(),
            filename: filename.into(),
            contenthash,
            filesize: 0,
            mimetype: None,
        }
    }

    /// Set the directory path
    #[must_use]
    pub fn with_path(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = filepath.into();
        self
    }

    /// Set the size
    #[must_use]
    pub fn with_size(mut self, filesize: u64) -> Self {
        self.filesize = filesize;
        self
    }

    /// Logical location without the content hash
    #[must_use]
    pub fn location(&self) -> String {
        format!(
            "{}/{}/{}/{}{}{}",
            self.contextid, self.component, self.filearea, self.itemid, self.filepath, self.filename
        )
    }

    /// Copy of this descriptor reattached to a new owner
    #[must_use]
    pub fn rehomed(&self, contextid: i64, itemid: i64) -> Self {
        Self {
            contextid,
            itemid,
            ..self.clone()
        }
    }

    /// Whether this descriptor belongs to `component`/`filearea`
    #[inline]
    #[must_use]
    pub fn in_area(&self, component: &str, filearea: &str) -> bool {
        self.component == component && self.filearea == filearea
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_joins_fields() {
        let d = FileDescriptor::new(7, "mod_forum", "attachment", 3, "notes.txt", ContentHash::compute(b"n"))
            .with_path("/week1/");
        assert_eq!(d.location(), "7/mod_forum/attachment/3/week1/notes.txt");
    }

    #[test]
    fn rehomed_keeps_hash() {
        let d = FileDescriptor::new(7, "mod_forum", "attachment", 3, "a.txt", ContentHash::compute(b"a"));
        let moved = d.rehomed(70, 30);
        assert_eq!(moved.contextid, 70);
        assert_eq!(moved.itemid, 30);
        assert_eq!(moved.contenthash, d.contenthash);
        assert_eq!(moved.filename, d.filename);
    }
}
