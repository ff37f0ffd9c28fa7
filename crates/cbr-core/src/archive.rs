//! Archive container
//!
//! On disk an archive is a directory:
//!
//! ```text
//! backup.json                      header and contents list
//! course/course.json               one element document per unit
//! sections/section_<id>.json
//! activities/<modname>_<cmid>.json
//! blocks/<blockname>_<id>.json
//! users.json                       only when users are included
//! files.json                       flat file manifest
//! files/                           blob pool
//! ```

use crate::config::BackupSettings;
use crate::error::BackupError;
use crate::ids::BackupId;
use crate::schema;
use cbr_document::{Document, FormatVersion, Node};
use cbr_files::{ContentHash, ContentPool, DirPool, FileDescriptor};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Header file name
pub const HEADER_FILE: &str = "backup.json";
/// Blob pool directory
pub const FILES_DIR: &str = "files";
/// Users document
pub const USERS_DOCUMENT: &str = "users.json";
/// File manifest document
pub const FILES_DOCUMENT: &str = "files.json";
/// Course document
pub const COURSE_DOCUMENT: &str = "course/course.json";

/// Document path of a section
#[must_use]
pub fn section_document(sectionid: i64) -> String {
    format!("sections/section_{sectionid}.json")
}

/// Document path of an activity
#[must_use]
pub fn activity_document(modulename: &str, cmid: i64) -> String {
    format!("activities/{modulename}_{cmid}.json")
}

/// Document path of a block
#[must_use]
pub fn block_document(blockname: &str, blockid: i64) -> String {
    format!("blocks/{blockname}_{blockid}.json")
}

/// Kind of unit a document describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// The course row
    Course,
    /// A course section
    Section,
    /// A course module
    Activity,
    /// A block instance
    Block,
    /// Referenced users
    Users,
    /// The file manifest
    Files,
}

/// One unit listed in the header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentsEntry {
    /// Unit kind
    pub kind: UnitKind,
    /// Unit id in the source site (0 for users and files)
    pub id: i64,
    /// Plugin or format name, or the unit's title
    pub name: String,
    /// Document path inside the archive
    pub document: String,
    /// Source section id, for activities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<i64>,
}

/// `backup.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Layout version, checked before anything else is read
    pub format_version: FormatVersion,
    /// Operation that produced the archive
    pub backupid: BackupId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Site the archive was taken from
    pub source_wwwroot: String,
    /// Course id in the source site
    pub original_course_id: i64,
    /// Course format in the source site
    pub original_course_format: String,
    /// Settings the backup ran with
    pub settings: BackupSettings,
    /// Units in restore order
    pub contents: Vec<ContentsEntry>,
    /// Attachments whose blob was absent at backup time; they have no
    /// manifest row
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_files: Vec<FileDescriptor>,
}

impl ArchiveHeader {
    /// Units of one kind, in order
    pub fn units(&self, kind: UnitKind) -> impl Iterator<Item = &ContentsEntry> {
        self.contents.iter().filter(move |e| e.kind == kind)
    }
}

/// Header, documents and blobs of one backup
#[derive(Clone)]
pub struct Archive {
    header: ArchiveHeader,
    documents: IndexMap<String, Document>,
    pool: Arc<dyn ContentPool>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("backupid", &self.header.backupid)
            .field("documents", &self.documents.keys().collect::<Vec<_>>())
            .field("blobs", &self.pool.blob_count())
            .finish()
    }
}

impl Archive {
    /// Archive with no documents yet
    #[must_use]
    pub fn new(header: ArchiveHeader, pool: Arc<dyn ContentPool>) -> Self {
        Self {
            header,
            documents: IndexMap::new(),
            pool,
        }
    }

    /// Header
    #[inline]
    #[must_use]
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    /// Add a unit and its document
    pub fn add_unit(&mut self, entry: ContentsEntry, document: Document) {
        self.documents.insert(entry.document.clone(), document);
        self.header.contents.push(entry);
    }

    /// Note an attachment that could not be archived
    pub fn note_missing(&mut self, descriptor: FileDescriptor) {
        self.header.missing_files.push(descriptor);
    }

    /// Document at `path`
    #[must_use]
    pub fn document(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Document paths in insertion order
    pub fn document_paths(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    /// Blob pool
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn ContentPool> {
        &self.pool
    }

    /// Hashes listed in the file manifest
    #[must_use]
    pub fn manifest_hashes(&self) -> Vec<ContentHash> {
        let Some(manifest) = self.documents.get(FILES_DOCUMENT) else {
            return Vec::new();
        };
        manifest
            .root
            .children()
            .iter()
            .filter_map(|file| match file.find("contenthash") {
                Some(Node::Leaf { value: Some(hex), .. }) => hex.parse().ok(),
                _ => None,
            })
            .collect()
    }

    /// Write the archive under `dir`
    ///
    /// Only blobs named by the manifest and present in the pool are copied.
    ///
    /// # Errors
    /// Filesystem or serialization failure
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), BackupError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        fs::write(dir.join(HEADER_FILE), serde_json::to_string_pretty(&self.header)?)?;
        for (path, document) in &self.documents {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, document.to_json()?)?;
        }

        let blobs = DirPool::open(dir.join(FILES_DIR))?;
        for hash in self.manifest_hashes() {
            if let Some(bytes) = self.pool.get(&hash)? {
                blobs.store(hash, &bytes)?;
            }
        }
        tracing::info!(dir = %dir.display(), documents = self.documents.len(), "archive saved");
        Ok(())
    }

    /// Read an archive saved under `dir`
    ///
    /// The header's version is checked before any document is loaded.
    ///
    /// # Errors
    /// [`BackupError::UnsupportedVersion`] for a newer major version,
    /// otherwise filesystem or format failures
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, BackupError> {
        let dir = dir.as_ref();
        let text = fs::read_to_string(dir.join(HEADER_FILE))?;
        let raw: serde_json::Value = serde_json::from_str(&text)?;
        let found: FormatVersion = raw
            .get("format_version")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| BackupError::InvalidArchive("header has no format_version".to_string()))?
            .parse()
            .map_err(|e| BackupError::InvalidArchive(format!("{e}")))?;
        FormatVersion::CURRENT.accepts(found)?;

        let header: ArchiveHeader = serde_json::from_value(raw)?;
        let mut documents = IndexMap::new();
        for entry in &header.contents {
            let json = fs::read_to_string(dir.join(&entry.document))?;
            let document = Document::from_json_with(&json, FormatVersion::CURRENT)?;
            documents.insert(entry.document.clone(), document);
        }
        let pool: Arc<dyn ContentPool> = Arc::new(DirPool::open(dir.join(FILES_DIR))?);
        tracing::info!(dir = %dir.display(), backupid = %header.backupid, "archive opened");
        Ok(Self { header, documents, pool })
    }

    /// Check a unit document's root against the expected element
    pub(crate) fn unit_document(&self, entry: &ContentsEntry) -> Result<&Document, BackupError> {
        let document = self
            .document(&entry.document)
            .ok_or_else(|| BackupError::InvalidArchive(format!("missing document {}", entry.document)))?;
        let expected = match entry.kind {
            UnitKind::Course => schema::COURSE,
            UnitKind::Section => schema::SECTION,
            UnitKind::Activity => schema::ACTIVITY,
            UnitKind::Block => schema::BLOCK,
            UnitKind::Users => schema::USERS,
            UnitKind::Files => schema::FILES,
        };
        if document.root_name() != expected {
            return Err(BackupError::InvalidArchive(format!(
                "{} has root `{}`, expected `{expected}`",
                entry.document,
                document.root_name()
            )));
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbr_files::MemoryPool;

    fn header() -> ArchiveHeader {
        ArchiveHeader {
            format_version: FormatVersion::CURRENT,
            backupid: BackupId::generate(),
            created_at: Utc::now(),
            source_wwwroot: "http://old.example".to_string(),
            original_course_id: 2,
            original_course_format: "topics".to_string(),
            settings: BackupSettings::default(),
            contents: Vec::new(),
            missing_files: Vec::new(),
        }
    }

    fn manifest(hash: &ContentHash) -> Document {
        Document::new(Node::Group {
            name: schema::FILES.to_string(),
            children: vec![Node::Group {
                name: "file".to_string(),
                children: vec![Node::Leaf {
                    name: "contenthash".to_string(),
                    value: Some(hash.to_string()),
                }],
            }],
        })
    }

    fn entry(kind: UnitKind, document: &str) -> ContentsEntry {
        ContentsEntry {
            kind,
            id: 0,
            name: document.to_string(),
            document: document.to_string(),
            section: None,
        }
    }

    #[test]
    fn save_and_open() {
        let pool = Arc::new(MemoryPool::new());
        let hash = pool.put(b"attachment").unwrap();
        pool.put(b"unreferenced").unwrap();

        let mut archive = Archive::new(header(), pool);
        archive.add_unit(entry(UnitKind::Files, FILES_DOCUMENT), manifest(&hash));

        let dir = tempfile::tempdir().unwrap();
        archive.save(dir.path()).unwrap();
        let opened = Archive::open(dir.path()).unwrap();

        assert_eq!(opened.header(), archive.header());
        assert_eq!(opened.pool().get(&hash).unwrap().unwrap(), b"attachment");
        assert_eq!(opened.pool().blob_count(), 1);
        assert_eq!(opened.manifest_hashes(), vec![hash]);
    }

    #[test]
    fn newer_major_refused_before_documents() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = header();
        h.format_version = FormatVersion::new(2, 0);
        h.contents.push(entry(UnitKind::Course, "course/missing.json"));
        fs::write(dir.path().join(HEADER_FILE), serde_json::to_string(&h).unwrap()).unwrap();

        let err = Archive::open(dir.path()).unwrap_err();
        assert!(matches!(err, BackupError::UnsupportedVersion(_)));
    }

    #[test]
    fn newer_minor_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = header();
        h.format_version = FormatVersion::new(1, 7);
        fs::write(dir.path().join(HEADER_FILE), serde_json::to_string(&h).unwrap()).unwrap();
        assert_eq!(Archive::open(dir.path()).unwrap().header().format_version, FormatVersion::new(1, 7));
    }
}
