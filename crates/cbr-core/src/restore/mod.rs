//! Restore side: archive → site
//!
//! Tasks read their unit document back into a tree, insert rows through the
//! entity writer and record every new id in the id map. References to rows
//! that do not exist yet are queued per task and patched in the after-all
//! pass, together with content links and section sequences.

mod tasks;

use crate::archive::{self, Archive, UnitKind};
use crate::config::RestoreSettings;
use crate::error::{BackupError, ErrorKind};
use crate::idmap::IdMapStore;
use crate::ids::{itemtype, BackupId};
use crate::links::LinkCodec;
use crate::manifest::descriptor_from_record;
use crate::plugin::{ContentPlugin, EntitySource, PluginRegistry, SourceLink};
use crate::schema;
use crate::site::{entity, Site};
use cbr_element::{Direction, Element, ProcessContext, Record};
use cbr_files::{FileDescriptor, FileOwner, FileRelocator};
use cbr_plan::{ExecutionContext, OperationLog, Plan, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tasks::{ActivityTask, BlockTask, CourseTask, SectionTask, UsersTask};

/// Where a restore puts the course
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreTarget {
    /// Insert a fresh course row
    NewCourse,
    /// Add the archive's content to an existing course
    ExistingCourse(i64),
}

/// Reference to patch once every task has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingPatch {
    entity: String,
    id: i64,
    field: String,
    itemtype: String,
    old: i64,
}

/// Restored rich-text field still holding link tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkField {
    entity: String,
    id: i64,
    field: String,
    text: String,
}

/// Section sequence to remap
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequenceFix {
    sectionid: i64,
    old: String,
    existing: String,
}

/// Work a task leaves for the after-all pass
#[derive(Debug, Default)]
pub(crate) struct Fixups {
    patches: Vec<PendingPatch>,
    links: Vec<LinkField>,
    sequence: Option<SequenceFix>,
}

/// Everything restore tasks read and write
pub struct RestoreContext {
    pub(crate) backupid: BackupId,
    pub(crate) archive: Arc<Archive>,
    pub(crate) site: Site,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) idmap: Arc<IdMapStore>,
    pub(crate) settings: RestoreSettings,
    pub(crate) target: RestoreTarget,
    pub(crate) course_id: Option<i64>,
    pub(crate) course_context: Option<i64>,
    pub(crate) source_course_context: Option<i64>,
    pub(crate) target_format: String,
    pub(crate) process: ProcessContext,
    pub(crate) codec: Arc<LinkCodec>,
    pub(crate) relocator: Arc<FileRelocator>,
    pub(crate) manifest: Vec<FileDescriptor>,
    pub(crate) log: OperationLog,
}

impl std::fmt::Debug for RestoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreContext")
            .field("backupid", &self.backupid)
            .field("target", &self.target)
            .field("course_id", &self.course_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext for RestoreContext {
    fn log(&mut self) -> &mut OperationLog {
        &mut self.log
    }
}

/// Collaborators a restore context is built from
pub(crate) struct RestoreParts {
    pub(crate) backupid: BackupId,
    pub(crate) wwwroot: String,
    pub(crate) site: Site,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) idmap: Arc<IdMapStore>,
    pub(crate) relocator: Arc<FileRelocator>,
}

impl RestoreContext {
    /// Context for restoring `archive` into `target`
    ///
    /// Settings the archive cannot satisfy are switched off.
    pub(crate) fn new(
        parts: RestoreParts,
        archive: Arc<Archive>,
        target: RestoreTarget,
        settings: &RestoreSettings,
    ) -> Result<Self, BackupError> {
        let RestoreParts {
            backupid,
            wwwroot,
            site,
            plugins,
            idmap,
            relocator,
        } = parts;
        let source = &archive.header().settings;
        let settings = RestoreSettings {
            include_users: settings.include_users && source.include_users,
            include_files: settings.include_files && source.include_files,
            include_blocks: settings.include_blocks && source.include_blocks,
            course_format: settings.course_format.clone(),
        };
        let codec = Arc::new(LinkCodec::new(&wwwroot, plugins.link_rules())?);
        let process = ProcessContext::new(backupid.to_string(), Direction::Restore);
        let mut ctx = Self {
            backupid,
            target_format: archive.header().original_course_format.clone(),
            archive,
            site,
            plugins,
            idmap,
            settings,
            target,
            course_id: None,
            course_context: None,
            source_course_context: None,
            process,
            codec,
            relocator,
            manifest: Vec::new(),
            log: OperationLog::new(),
        };
        ctx.manifest = ctx.load_manifest()?;
        Ok(ctx)
    }

    /// Restored course id, once the course task ran
    #[must_use]
    pub fn course_id(&self) -> Option<i64> {
        self.course_id
    }

    /// Operation log
    #[must_use]
    pub fn operation_log(&self) -> &OperationLog {
        &self.log
    }

    pub(crate) fn into_log(self) -> OperationLog {
        self.log
    }

    fn load_manifest(&mut self) -> Result<Vec<FileDescriptor>, BackupError> {
        let Some(entry) = self.archive.header().units(UnitKind::Files).next().cloned() else {
            return Ok(Vec::new());
        };
        let tree = self.read_unit("files", &entry, schema::files()?)?;
        tree.child("file")
            .map(Element::instances)
            .unwrap_or_default()
            .iter()
            .map(|file| descriptor_from_record(&file.scalar_record()))
            .collect()
    }

    /// Read a unit document into `schema`, logging skipped entries
    fn read_unit(&mut self, task: &str, entry: &archive::ContentsEntry, schema: Element) -> Result<Element, BackupError> {
        let document = self.archive.unit_document(entry)?;
        let outcome = cbr_document::read(document, schema, &self.process)?;
        for warning in &outcome.warnings {
            tracing::warn!(task, %warning, "skipped document entry");
            self.log.warn(ErrorKind::SkippedEntry.as_str(), Some(task), warning.to_string());
        }
        Ok(outcome.tree)
    }

    fn course(&self) -> Result<i64, BackupError> {
        self.course_id
            .ok_or_else(|| BackupError::InvalidArchive("course not restored yet".to_string()))
    }

    fn lookup(&self, itemtype: &str, old: i64) -> Option<i64> {
        self.idmap.lookup(self.backupid, itemtype, old)
    }

    fn record(&self, itemtype: &str, old: i64, new: i64) -> Result<(), BackupError> {
        Ok(self.idmap.record(self.backupid, itemtype, old, new)?)
    }

    /// Insert one plugin row, remapping what can be remapped now
    fn insert_row(&mut self, source: &EntitySource, mut record: Record, fixups: &mut Fixups) -> Result<i64, BackupError> {
        let mut pending = Vec::new();
        for reference in &source.references {
            let Some(old) = record.get_i64(&reference.field).filter(|id| *id > 0) else {
                continue;
            };
            match self.lookup(&reference.itemtype, old) {
                Some(new) => record.set(reference.field.clone(), Some(new.to_string())),
                None => pending.push((reference, old)),
            }
        }
        for reference in &source.deferred {
            if let Some(old) = record.get_i64(&reference.field).filter(|id| *id > 0) {
                pending.push((reference, old));
            }
        }

        let id = self.site.writer.insert(&source.entity, &record)?;
        for (reference, old) in pending {
            fixups.patches.push(PendingPatch {
                entity: source.entity.clone(),
                id,
                field: reference.field.clone(),
                itemtype: reference.itemtype.clone(),
                old,
            });
        }
        for field in &source.encoded {
            if let Some(text) = record.get(field).filter(|t| self.codec.has_tokens(t)) {
                fixups.links.push(LinkField {
                    entity: source.entity.clone(),
                    id,
                    field: field.clone(),
                    text: text.to_string(),
                });
            }
        }
        Ok(id)
    }

    /// Insert a plugin subtree; `link` is the enclosing row for a block's
    /// root source
    fn restore_plugin(
        &mut self,
        plugin: &ContentPlugin,
        root: &Element,
        link: i64,
        fixups: &mut Fixups,
    ) -> Result<i64, BackupError> {
        let source = plugin
            .root_source()
            .ok_or_else(|| BackupError::InvalidArchive(format!("plugin {} has no root source", plugin.name())))?;
        let mut record = root.scalar_record();
        let old = take_id(&mut record);
        match &source.link {
            SourceLink::Instance => record.set("course", Some(self.course()?.to_string())),
            SourceLink::Parent(field) => record.set(field.clone(), Some(link.to_string())),
        }
        let id = self.insert_row(source, record, fixups)?;
        if let Some(old) = old {
            self.record(&source.itemtype, old, id)?;
        }
        self.restore_nested(plugin, root, 0, id, fixups)?;
        Ok(id)
    }

    fn restore_nested(
        &mut self,
        plugin: &ContentPlugin,
        element: &Element,
        parent: usize,
        parent_id: i64,
        fixups: &mut Fixups,
    ) -> Result<(), BackupError> {
        let sources = plugin.sources();
        for (index, source) in sources.iter().enumerate() {
            if plugin.parent_of(index) != Some(parent) || (source.user_data && !self.settings.include_users) {
                continue;
            }
            let SourceLink::Parent(field) = &source.link else {
                continue;
            };
            let Some(target) = source
                .path
                .relative_to(&sources[parent].path)
                .and_then(|below| element.descend(below))
            else {
                continue;
            };
            for instance in target.instances() {
                let mut record = instance.scalar_record();
                let old = take_id(&mut record);
                record.set(field.clone(), Some(parent_id.to_string()));
                let id = self.insert_row(source, record, fixups)?;
                if let Some(old) = old {
                    self.record(&source.itemtype, old, id)?;
                }
                self.restore_nested(plugin, instance, index, id, fixups)?;
            }
        }
        Ok(())
    }

    /// Copy the manifest files of one old context that `keep` selects
    fn restore_files<F>(&mut self, task: &str, old_context: i64, keep: F) -> Result<(), BackupError>
    where
        F: Fn(&FileDescriptor) -> bool,
    {
        let files: Vec<_> = self
            .manifest
            .iter()
            .filter(|d| d.contextid == old_context && keep(d))
            .cloned()
            .collect();
        self.relocator.expect(files.len() as u64);

        for descriptor in &files {
            let Some(contextid) = self.lookup(itemtype::CONTEXT, descriptor.contextid) else {
                self.unresolved(task, format!("context {} of {}", descriptor.contextid, descriptor.location()));
                continue;
            };
            let owner = self
                .plugins
                .file_area(&descriptor.component, &descriptor.filearea)
                .and_then(|area| area.itemtype);
            let itemid = match owner {
                Some(owner) => match self.lookup(&owner, descriptor.itemid) {
                    Some(id) => id,
                    None => {
                        self.unresolved(task, format!("{owner} {} owning {}", descriptor.itemid, descriptor.location()));
                        continue;
                    }
                },
                None => descriptor.itemid,
            };
            let stored = self.relocator.copy_to_destination(
                self.archive.pool().as_ref(),
                self.site.pool.as_ref(),
                self.site.files.as_ref(),
                descriptor,
                FileOwner { contextid, itemid },
            );
            match stored {
                Ok(_) => {}
                Err(e) if e.is_missing() => {
                    self.log.warn(ErrorKind::MissingFile.as_str(), Some(task), e.to_string());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn unresolved(&mut self, task: &str, what: String) {
        tracing::warn!(task, %what, "unresolved reference");
        self.log.warn(ErrorKind::UnresolvedReference.as_str(), Some(task), format!("unresolved {what}"));
    }

    /// After-all pass for one task: lookups and targeted patches only
    fn apply_fixups(&mut self, task: &str, fixups: &mut Fixups) -> Result<(), BackupError> {
        for patch in std::mem::take(&mut fixups.patches) {
            let value = match self.lookup(&patch.itemtype, patch.old) {
                Some(new) => new,
                None => {
                    self.unresolved(
                        task,
                        format!("{} {} in {}.{} of row {}", patch.itemtype, patch.old, patch.entity, patch.field, patch.id),
                    );
                    0
                }
            };
            self.site
                .writer
                .update(&patch.entity, patch.id, &Record::new().with(patch.field.clone(), value))?;
        }

        let source_wwwroot = self.archive.header().source_wwwroot.clone();
        for link in std::mem::take(&mut fixups.links) {
            let decoded = self.codec.decode(&link.text, &source_wwwroot, |rule, old| {
                self.idmap.lookup(self.backupid, &rule.itemtype, old)
            });
            for token in &decoded.unresolved {
                self.unresolved(task, format!("link {token} in {}.{}", link.entity, link.field));
            }
            if decoded.text != link.text {
                self.site
                    .writer
                    .update(&link.entity, link.id, &Record::new().with(link.field.clone(), decoded.text))?;
            }
        }

        if let Some(fix) = fixups.sequence.take() {
            let mut ids: Vec<String> = fix
                .existing
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            for old in fix.old.split(',').filter_map(|s| s.trim().parse::<i64>().ok()) {
                match self.lookup(itemtype::ACTIVITY, old) {
                    Some(new) => ids.push(new.to_string()),
                    None => self.unresolved(task, format!("activity {old} in section sequence")),
                }
            }
            self.site
                .writer
                .update(entity::SECTIONS, fix.sectionid, &Record::new().with("sequence", ids.join(",")))?;
        }
        Ok(())
    }
}

fn take_id(record: &mut Record) -> Option<i64> {
    record.remove("id").flatten().and_then(|id| id.parse().ok())
}

/// One task per archive unit
///
/// Activities and blocks whose plugin is not installed are skipped with a
/// warning.
pub(crate) fn build_plan(ctx: &mut RestoreContext) -> Result<Plan<RestoreContext>, BackupError> {
    let header = ctx.archive.header().clone();
    let course_entry = header
        .units(UnitKind::Course)
        .next()
        .cloned()
        .ok_or_else(|| BackupError::InvalidArchive("no course unit".to_string()))?;
    let files = ctx.settings.include_files;
    if files {
        for missing in &header.missing_files {
            ctx.log.warn(
                ErrorKind::MissingFile.as_str(),
                None,
                format!("{} was missing when the archive was made", missing.location()),
            );
        }
    }

    let mut plan = Plan::new();
    let course = plan.add_task(Box::new(CourseTask::new(course_entry, files)), &[])?;
    let mut base = vec![course];
    if ctx.settings.include_users {
        if let Some(users) = header.units(UnitKind::Users).next() {
            base.push(plan.add_task(Box::new(UsersTask::new(users.clone())), &[course])?);
        }
    }

    let mut sections: HashMap<i64, TaskId> = HashMap::new();
    for entry in header.units(UnitKind::Section) {
        let task = plan.add_task(Box::new(SectionTask::new(entry.clone(), files)), &base)?;
        sections.insert(entry.id, task);
    }

    for entry in header.units(UnitKind::Activity) {
        let Some(plugin) = ctx.plugins.activity(&entry.name).cloned() else {
            skip_unit(ctx, &mut plan, &format!("activity_{}", entry.id), "activity", &entry.name);
            continue;
        };
        let deps: Vec<TaskId> = match entry.section.and_then(|s| sections.get(&s)) {
            Some(section) => vec![*section],
            None => base.clone(),
        };
        plan.add_task(Box::new(ActivityTask::new(entry.clone(), plugin, files)), &deps)?;
    }

    if ctx.settings.include_blocks {
        for entry in header.units(UnitKind::Block) {
            let Some(plugin) = ctx.plugins.block(&entry.name).cloned() else {
                skip_unit(ctx, &mut plan, &format!("block_{}", entry.id), "block", &entry.name);
                continue;
            };
            plan.add_task(Box::new(BlockTask::new(entry.clone(), plugin, files)), &base)?;
        }
    }
    Ok(plan)
}

fn skip_unit(ctx: &mut RestoreContext, plan: &mut Plan<RestoreContext>, unit: &str, what: &str, name: &str) {
    let reason = format!("{what} plugin `{name}` is not installed");
    ctx.log.warn(ErrorKind::Plan.as_str(), None, format!("{unit} skipped: {reason}"));
    plan.skip(unit, reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_id_removes_field() {
        let mut record = Record::new().with("id", 9).with("name", "x");
        assert_eq!(take_id(&mut record), Some(9));
        assert!(!record.contains("id"));
        assert_eq!(take_id(&mut Record::new().with_null("id")), None);
    }
}
