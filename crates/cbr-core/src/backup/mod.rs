//! Backup side: site → archive
//!
//! One task per structural unit fills that unit's element tree from the
//! entity accessor and writes it as a document into the archive. File
//! steps copy attachments into the archive pool through the manifest tree.

mod tasks;

use crate::archive::{Archive, ArchiveHeader};
use crate::config::BackupSettings;
use crate::error::{BackupError, ErrorKind};
use crate::idmap::IdMapStore;
use crate::ids::{itemtype, BackupId};
use crate::links::{LinkCodec, LinkEncodeTransform};
use crate::manifest::{self, descriptor_record, FileCopyTransform};
use crate::plugin::{ContentPlugin, EntitySource, PluginRegistry, SourceLink};
use crate::site::{context_level, entity, find_context, Site, SiteError};
use cbr_element::{
    Anonymize, AnonymizeTransform, Element, ElementError, ProcessContext, Record, StructureError,
    TransformRegistry,
};
use cbr_files::{FileDescriptor, FileRelocator, RelocationError};
use cbr_plan::{ExecutionContext, OperationLog, Plan};
use std::sync::Arc;
use tasks::{ActivityTask, BlockTask, CourseTask, ManifestTask, SectionTask, UsersTask};

/// Everything backup tasks read and write
pub struct BackupContext {
    pub(crate) backupid: BackupId,
    pub(crate) site: Site,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) idmap: Arc<IdMapStore>,
    pub(crate) settings: BackupSettings,
    pub(crate) course_format: String,
    pub(crate) process: ProcessContext,
    pub(crate) transforms: Arc<TransformRegistry>,
    pub(crate) relocator: Arc<FileRelocator>,
    pub(crate) manifest: Element,
    pub(crate) archive: Archive,
    pub(crate) log: OperationLog,
}

impl std::fmt::Debug for BackupContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupContext")
            .field("backupid", &self.backupid)
            .field("settings", &self.settings)
            .field("archive", &self.archive)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext for BackupContext {
    fn log(&mut self) -> &mut OperationLog {
        &mut self.log
    }
}

/// Collaborators a backup context is built from
pub(crate) struct BackupParts {
    pub(crate) wwwroot: String,
    pub(crate) site: Site,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) idmap: Arc<IdMapStore>,
    pub(crate) relocator: Arc<FileRelocator>,
}

impl BackupContext {
    pub(crate) fn new(parts: BackupParts, header: ArchiveHeader, pool: Arc<dyn cbr_files::ContentPool>) -> Result<Self, BackupError> {
        let BackupParts {
            wwwroot,
            site,
            plugins,
            idmap,
            relocator,
        } = parts;
        let codec = Arc::new(LinkCodec::new(&wwwroot, plugins.link_rules())?);
        let transforms = Arc::new(operation_transforms(&plugins, &codec)?);
        let manifest = manifest::backup_manifest(FileCopyTransform::new(
            Arc::clone(&site.pool),
            Arc::clone(&pool),
            Arc::clone(&relocator),
        ))?;
        let process = ProcessContext::new(header.backupid.to_string(), cbr_element::Direction::Backup)
            .with_anonymize(header.settings.anonymize);
        Ok(Self {
            backupid: header.backupid,
            settings: header.settings.clone(),
            course_format: header.original_course_format.clone(),
            site,
            plugins,
            idmap,
            process,
            transforms,
            relocator,
            manifest,
            archive: Archive::new(header, pool),
            log: OperationLog::new(),
        })
    }

    /// Archive built so far
    #[must_use]
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Operation log
    #[must_use]
    pub fn operation_log(&self) -> &OperationLog {
        &self.log
    }

    pub(crate) fn into_parts(self) -> (Archive, OperationLog) {
        (self.archive, self.log)
    }

    fn fetch(&self, table: &str, id: i64) -> Result<Record, BackupError> {
        self.site.accessor.fetch(table, id)?.ok_or_else(|| {
            SiteError::NotFound {
                entity: table.to_string(),
                id,
            }
            .into()
        })
    }

    fn context_of(&self, level: &str, instanceid: i64) -> Result<i64, BackupError> {
        find_context(self.site.accessor.as_ref(), level, instanceid)?.ok_or_else(|| {
            SiteError::NotFound {
                entity: format!("{level} context of"),
                id: instanceid,
            }
            .into()
        })
    }

    fn annotate_users(&self, source: &EntitySource, row: &Record) {
        for reference in source.all_references().filter(|r| r.itemtype == itemtype::USER) {
            if let Some(id) = row.get_i64(&reference.field).filter(|id| *id > 0) {
                self.idmap.annotate(self.backupid, itemtype::USER, id);
            }
        }
    }

    /// Fill a plugin subtree from its root row and everything below it
    fn fill_plugin(&self, plugin: &ContentPlugin, root: &mut Element, row: &Record) -> Result<(), BackupError> {
        if let Some(source) = plugin.root_source() {
            self.annotate_users(source, row);
        }
        root.fill_values(row, &self.process)?;
        if let Some(id) = row.id() {
            self.fill_nested(plugin, root, 0, id)?;
        }
        Ok(())
    }

    fn fill_nested(&self, plugin: &ContentPlugin, element: &mut Element, parent: usize, parent_id: i64) -> Result<(), BackupError> {
        let sources = plugin.sources();
        for (index, source) in sources.iter().enumerate() {
            if plugin.parent_of(index) != Some(parent) {
                continue;
            }
            if source.user_data && !self.settings.include_users {
                continue;
            }
            let SourceLink::Parent(field) = &source.link else {
                continue;
            };
            let below = source
                .path
                .relative_to(&sources[parent].path)
                .ok_or_else(|| StructureError::NotComposite(source.path.to_string()))?;
            let rows = self.site.accessor.list(&source.entity, field, &parent_id.to_string())?;
            for row in rows {
                self.annotate_users(source, &row);
                let target = element
                    .descend_mut(below)
                    .ok_or_else(|| StructureError::NotComposite(source.path.to_string()))?;
                let instance = target.add_instance(&row, &self.process)?;
                if let Some(id) = row.id() {
                    self.fill_nested(plugin, instance, index, id)?;
                }
            }
        }
        Ok(())
    }

    /// Copy the attachments of one context that `keep` selects
    ///
    /// A missing blob is a warning; the file gets no manifest row, only a
    /// placeholder in the archive header.
    fn archive_files<F>(&mut self, task: &str, contextid: i64, keep: F) -> Result<(), BackupError>
    where
        F: Fn(&FileDescriptor) -> bool,
    {
        let files: Vec<_> = self.site.files.list(contextid)?.into_iter().filter(|d| keep(d)).collect();
        self.relocator.expect(files.len() as u64);
        let file = self
            .manifest
            .child_mut("file")
            .ok_or_else(|| StructureError::NotComposite("file".to_string()))?;
        for descriptor in &files {
            match file.add_instance(&descriptor_record(descriptor), &self.process) {
                Ok(_) => {}
                Err(e) if is_missing_file(&e) => {
                    tracing::warn!(task, file = %descriptor.location(), "source file missing");
                    self.log.warn(ErrorKind::MissingFile.as_str(), Some(task), e.to_string());
                    self.archive.note_missing(descriptor.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn is_missing_file(e: &ElementError) -> bool {
    e.transform_source()
        .and_then(|source| source.downcast_ref::<RelocationError>())
        .is_some_and(RelocationError::is_missing)
}

/// Transforms every backup tree of an operation binds
pub(crate) fn operation_transforms(plugins: &PluginRegistry, codec: &Arc<LinkCodec>) -> Result<TransformRegistry, BackupError> {
    let mut registry = TransformRegistry::new();
    let links = Arc::new(LinkEncodeTransform::new(Arc::clone(codec)));
    registry.register(crate::schema::COURSE, "summary", links.clone())?;
    registry.register(crate::schema::SECTION, "summary", links.clone())?;

    for plugin in plugins.activities().chain(plugins.blocks()) {
        for source in plugin.sources() {
            for field in &source.encoded {
                if registry.get(source.element_name(), field).is_none() {
                    registry.register(source.element_name(), field, links.clone())?;
                }
            }
        }
    }

    for (field, rule) in [
        ("username", Anonymize::Prefixed("anon".to_string())),
        ("firstname", Anonymize::Prefixed("anonfirstname".to_string())),
        ("lastname", Anonymize::Prefixed("anonlastname".to_string())),
        ("email", Anonymize::Email("doesntexist.invalid".to_string())),
    ] {
        registry.register("user", field, Arc::new(AnonymizeTransform::new(rule)))?;
    }
    Ok(registry)
}

/// Position of each module in its section: by `sequence`, then by id
fn section_modules<'a>(section: &Record, modules: &'a [Record]) -> Vec<&'a Record> {
    let sectionid = section.id();
    let sequence: Vec<i64> = section
        .get("sequence")
        .unwrap_or_default()
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect();
    let mut found: Vec<&Record> = modules
        .iter()
        .filter(|cm| cm.get_i64("section") == sectionid)
        .collect();
    found.sort_by_key(|cm| {
        let id = cm.id().unwrap_or_default();
        let position = sequence.iter().position(|s| *s == id).unwrap_or(usize::MAX);
        (position, id)
    });
    found
}

/// One task per unit of `courseid`, in declaration order
///
/// Units whose plugin is not installed are skipped with a warning.
pub(crate) fn build_plan(ctx: &mut BackupContext, courseid: i64) -> Result<Plan<BackupContext>, BackupError> {
    let accessor = Arc::clone(&ctx.site.accessor);
    let files = ctx.settings.include_files;
    let mut plan = Plan::new();
    let course = plan.add_task(Box::new(CourseTask::new(courseid, files)), &[])?;
    let mut all = vec![course];

    let mut sections = accessor.list(entity::SECTIONS, "course", &courseid.to_string())?;
    sections.sort_by_key(|s| s.get_i64("section").unwrap_or_default());
    let modules = accessor.list(entity::MODULES, "course", &courseid.to_string())?;

    let mut planned_sections = Vec::new();
    for section in &sections {
        let Some(id) = section.id() else { continue };
        let task = plan.add_task(Box::new(SectionTask::new(id, files)), &[course])?;
        planned_sections.push((section, task));
        all.push(task);
    }

    for (section, section_task) in &planned_sections {
        for cm in section_modules(section, &modules) {
            let cmid = cm.id().unwrap_or_default();
            let modulename = cm.get("modulename").unwrap_or_default();
            match ctx.plugins.activity(modulename) {
                Some(plugin) => {
                    let task = ActivityTask::new(cmid, section.id().unwrap_or_default(), Arc::clone(plugin), files);
                    all.push(plan.add_task(Box::new(task), &[*section_task])?);
                }
                None => skip_unit(ctx, &mut plan, &format!("activity_{cmid}"), "activity", modulename),
            }
        }
    }

    if ctx.settings.include_blocks {
        let course_context = ctx.context_of(context_level::COURSE, courseid)?;
        let blocks = accessor.list(entity::BLOCKS, "parentcontextid", &course_context.to_string())?;
        for block in &blocks {
            let id = block.id().unwrap_or_default();
            let blockname = block.get("blockname").unwrap_or_default();
            match ctx.plugins.block(blockname) {
                Some(plugin) => {
                    let task = BlockTask::new(id, Arc::clone(plugin), files);
                    all.push(plan.add_task(Box::new(task), &[course])?);
                }
                None => skip_unit(ctx, &mut plan, &format!("block_{id}"), "block", blockname),
            }
        }
    }

    if ctx.settings.include_users {
        let users = plan.add_task(Box::new(UsersTask), &all)?;
        all.push(users);
    }
    plan.add_task(Box::new(ManifestTask), &all)?;
    Ok(plan)
}

fn skip_unit<C>(ctx: &mut BackupContext, plan: &mut Plan<C>, unit: &str, what: &str, name: &str) {
    let reason = format!("{what} plugin `{name}` is not installed");
    ctx.log.warn(ErrorKind::Plan.as_str(), None, format!("{unit} skipped: {reason}"));
    plan.skip(unit, reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modules_follow_sequence_then_id() {
        let section = Record::new().with("id", 1).with("sequence", "12,10");
        let modules = vec![
            Record::new().with("id", 10).with("section", 1),
            Record::new().with("id", 11).with("section", 1),
            Record::new().with("id", 12).with("section", 1),
            Record::new().with("id", 13).with("section", 2),
        ];
        let ids: Vec<_> = section_modules(&section, &modules).iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, [12, 10, 11]);
    }
}
