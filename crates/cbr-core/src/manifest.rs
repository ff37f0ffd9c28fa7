//! File manifest rows
//!
//! Every attachment of a backed-up unit becomes one `file` instance of the
//! manifest tree. Setting its `content` field copies the blob into the
//! archive pool and stores nothing inline.

use crate::error::BackupError;
use crate::schema;
use cbr_element::{
    Element, Record, TransformError, TransformInput, TransformOutcome, TransformRegistry, ValueTransform,
};
use cbr_files::{ContentPool, FileDescriptor, FileRelocator};
use std::fmt;
use std::sync::Arc;

/// Manifest row for a descriptor; `content` carries the hash for the copy
#[must_use]
pub fn descriptor_record(descriptor: &FileDescriptor) -> Record {
    let hash = descriptor.contenthash.to_string();
    let mut record = Record::new()
        .with("contextid", descriptor.contextid)
        .with("component", &descriptor.component)
        .with("filearea", &descriptor.filearea)
        .with("itemid", descriptor.itemid)
        .with("filepath", &descriptor.filepath)
        .with("filename", &descriptor.filename)
        .with("contenthash", &hash)
        .with("filesize", descriptor.filesize)
        .with(schema::FILE_CONTENT, hash);
    record.set("mimetype", descriptor.mimetype.clone());
    record
}

fn field<'a>(record: &'a Record, name: &str) -> Result<&'a str, BackupError> {
    record
        .get(name)
        .ok_or_else(|| BackupError::InvalidArchive(format!("file row without `{name}`")))
}

fn number(record: &Record, name: &str) -> Result<i64, BackupError> {
    record
        .get_i64(name)
        .ok_or_else(|| BackupError::InvalidArchive(format!("file row with bad `{name}`")))
}

/// Descriptor from a manifest row
///
/// # Errors
/// [`BackupError::InvalidArchive`] for missing or malformed fields
pub fn descriptor_from_record(record: &Record) -> Result<FileDescriptor, BackupError> {
    let contenthash = field(record, "contenthash")?
        .parse()
        .map_err(|e| BackupError::InvalidArchive(format!("file row: {e}")))?;
    let mut descriptor = FileDescriptor::new(
        number(record, "contextid")?,
        field(record, "component")?,
        field(record, "filearea")?,
        number(record, "itemid")?,
        field(record, "filename")?,
        contenthash,
    )
    .with_path(record.get("filepath").unwrap_or("/"))
    .with_size(record.get("filesize").and_then(|s| s.parse().ok()).unwrap_or_default());
    descriptor.mimetype = record.get("mimetype").map(str::to_string);
    Ok(descriptor)
}

/// Copies a file's blob into the archive when its `content` is set
pub struct FileCopyTransform {
    source: Arc<dyn ContentPool>,
    archive: Arc<dyn ContentPool>,
    relocator: Arc<FileRelocator>,
}

impl fmt::Debug for FileCopyTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCopyTransform")
            .field("relocator", &self.relocator)
            .finish_non_exhaustive()
    }
}

impl FileCopyTransform {
    /// Copy from `source` into `archive`
    #[must_use]
    pub fn new(source: Arc<dyn ContentPool>, archive: Arc<dyn ContentPool>, relocator: Arc<FileRelocator>) -> Self {
        Self {
            source,
            archive,
            relocator,
        }
    }
}

impl ValueTransform for FileCopyTransform {
    fn apply(&self, input: &TransformInput<'_>) -> Result<TransformOutcome, TransformError> {
        let record = input.record.ok_or("file content set outside a manifest row")?;
        let descriptor = descriptor_from_record(record)?;
        self.relocator
            .copy_to_archive(self.source.as_ref(), self.archive.as_ref(), &descriptor)?;
        Ok(TransformOutcome::Suppress)
    }
}

/// Manifest tree with the copying transform bound
///
/// # Errors
/// Never for the built-in shape
pub fn backup_manifest(copy: FileCopyTransform) -> Result<Element, BackupError> {
    let mut registry = TransformRegistry::new();
    registry.register("file", schema::FILE_CONTENT, Arc::new(copy))?;
    let mut tree = schema::files()?;
    tree.bind_transforms(&Arc::new(registry))?;
    Ok(tree)
}
