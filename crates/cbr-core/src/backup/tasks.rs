//! Backup tasks, one per structural unit

use super::BackupContext;
use crate::archive::{self, ContentsEntry, UnitKind};
use crate::error::{BackupError, ErrorKind};
use crate::ids::itemtype;
use crate::plugin::{ContentPlugin, SourceLink};
use crate::schema::{self, slot};
use crate::site::{context_level, entity};
use cbr_element::{fixed_selector, Element, Record, StructureError};
use cbr_plan::{StepError, StepSpec, Task};
use std::sync::Arc;

const STRUCTURE: &str = "structure";
const FILES: &str = "files";

fn unit_steps(files: bool) -> Vec<StepSpec> {
    let mut steps = vec![StepSpec::structure(STRUCTURE)];
    if files {
        steps.push(StepSpec::files(FILES).best_effort());
    }
    steps
}

fn slot_of<'a>(tree: &'a mut Element, name: &str) -> Result<&'a mut Element, BackupError> {
    tree.child_mut(name)
        .ok_or_else(|| StructureError::NotComposite(name.to_string()).into())
}

fn unknown_step(task: &str, step: &StepSpec) -> StepError {
    StepError::new(format!("{task} has no step `{}`", step.name))
}

pub(super) struct CourseTask {
    name: String,
    courseid: i64,
    contextid: Option<i64>,
    files: bool,
}

impl CourseTask {
    pub(super) fn new(courseid: i64, files: bool) -> Self {
        Self {
            name: "course".to_string(),
            courseid,
            contextid: None,
            files,
        }
    }

    fn structure(&mut self, ctx: &mut BackupContext) -> Result<(), BackupError> {
        let row = ctx.fetch(entity::COURSE, self.courseid)?;
        let contextid = ctx.context_of(context_level::COURSE, self.courseid)?;
        self.contextid = Some(contextid);

        let mut tree = schema::course()?;
        tree.bind_transforms(&ctx.transforms)?;
        tree.fill_values(&row.clone().with("contextid", contextid), &ctx.process)?;
        let document = cbr_document::write(&tree, &ctx.process)?;
        ctx.archive.add_unit(
            ContentsEntry {
                kind: UnitKind::Course,
                id: self.courseid,
                name: row.get("shortname").unwrap_or_default().to_string(),
                document: archive::COURSE_DOCUMENT.to_string(),
                section: None,
            },
            document,
        );
        Ok(())
    }
}

impl Task<BackupContext> for CourseTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut BackupContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let contextid = self.contextid.unwrap_or_default();
                ctx.archive_files(&self.name, contextid, |d| d.in_area("course", "summary"))?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }
}

pub(super) struct SectionTask {
    name: String,
    sectionid: i64,
    contextid: Option<i64>,
    files: bool,
}

impl SectionTask {
    pub(super) fn new(sectionid: i64, files: bool) -> Self {
        Self {
            name: format!("section_{sectionid}"),
            sectionid,
            contextid: None,
            files,
        }
    }

    fn structure(&mut self, ctx: &mut BackupContext) -> Result<(), BackupError> {
        let row = ctx.fetch(entity::SECTIONS, self.sectionid)?;
        let courseid = row.get_i64("course").unwrap_or_default();
        self.contextid = Some(ctx.context_of(context_level::COURSE, courseid)?);

        let format = ctx.course_format.clone();
        let mut tree = schema::section(&ctx.plugins, Some(fixed_selector(format.as_str())))?;
        tree.bind_transforms(&ctx.transforms)?;
        tree.fill_values(&row, &ctx.process)?;

        if let Some(options) = slot_of(&mut tree, slot::FORMAT_OPTIONS)?.resolved_mut() {
            let values: Record = ctx
                .site
                .accessor
                .list(entity::FORMAT_OPTIONS, "sectionid", &self.sectionid.to_string())?
                .iter()
                .filter(|o| o.get("format") == Some(format.as_str()))
                .filter_map(|o| Some((o.get("name")?.to_string(), o.get("value").map(str::to_string))))
                .collect();
            options.fill_values(&values, &ctx.process)?;
        }

        let document = cbr_document::write(&tree, &ctx.process)?;
        ctx.archive.add_unit(
            ContentsEntry {
                kind: UnitKind::Section,
                id: self.sectionid,
                name: row.get("name").unwrap_or_default().to_string(),
                document: archive::section_document(self.sectionid),
                section: None,
            },
            document,
        );
        Ok(())
    }
}

impl Task<BackupContext> for SectionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut BackupContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let sectionid = self.sectionid;
                let contextid = self.contextid.unwrap_or_default();
                ctx.archive_files(&self.name, contextid, |d| {
                    d.in_area("course", "section") && d.itemid == sectionid
                })?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }
}

pub(super) struct ActivityTask {
    name: String,
    cmid: i64,
    sectionid: i64,
    plugin: Arc<ContentPlugin>,
    contextid: Option<i64>,
    files: bool,
}

impl ActivityTask {
    pub(super) fn new(cmid: i64, sectionid: i64, plugin: Arc<ContentPlugin>, files: bool) -> Self {
        Self {
            name: format!("activity_{cmid}"),
            cmid,
            sectionid,
            plugin,
            contextid: None,
            files,
        }
    }

    fn structure(&mut self, ctx: &mut BackupContext) -> Result<(), BackupError> {
        let cm = ctx.fetch(entity::MODULES, self.cmid)?;
        let contextid = ctx.context_of(context_level::MODULE, self.cmid)?;
        self.contextid = Some(contextid);

        let mut tree = schema::activity(&ctx.plugins, Some(fixed_selector(self.plugin.name())))?;
        tree.bind_transforms(&ctx.transforms)?;
        tree.fill_scalars(&cm.clone().with("contextid", contextid), &ctx.process)?;

        let root_source = self
            .plugin
            .root_source()
            .ok_or_else(|| StructureError::InvalidName(self.plugin.name().to_string()))?;
        let instance = cm.get_i64("instance").unwrap_or_default();
        let row = ctx.fetch(&root_source.entity, instance)?;
        let root = slot_of(&mut tree, slot::PLUGIN)?
            .resolve(&ctx.process)?
            .ok_or_else(|| StructureError::NotComposite(slot::PLUGIN.to_string()))?;
        ctx.fill_plugin(&self.plugin, root, &row)?;

        let document = cbr_document::write(&tree, &ctx.process)?;
        ctx.archive.add_unit(
            ContentsEntry {
                kind: UnitKind::Activity,
                id: self.cmid,
                name: self.plugin.name().to_string(),
                document: archive::activity_document(self.plugin.name(), self.cmid),
                section: Some(self.sectionid),
            },
            document,
        );
        Ok(())
    }
}

impl Task<BackupContext> for ActivityTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut BackupContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let plugin = Arc::clone(&self.plugin);
                let contextid = self.contextid.unwrap_or_default();
                ctx.archive_files(&self.name, contextid, |d| {
                    plugin.file_areas().iter().any(|a| a.matches(&d.component, &d.filearea))
                })?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }
}

pub(super) struct BlockTask {
    name: String,
    blockid: i64,
    plugin: Arc<ContentPlugin>,
    contextid: Option<i64>,
    files: bool,
}

impl BlockTask {
    pub(super) fn new(blockid: i64, plugin: Arc<ContentPlugin>, files: bool) -> Self {
        Self {
            name: format!("block_{blockid}"),
            blockid,
            plugin,
            contextid: None,
            files,
        }
    }

    fn structure(&mut self, ctx: &mut BackupContext) -> Result<(), BackupError> {
        let row = ctx.fetch(entity::BLOCKS, self.blockid)?;
        let contextid = ctx.context_of(context_level::BLOCK, self.blockid)?;
        self.contextid = Some(contextid);

        let mut tree = schema::block(&ctx.plugins, Some(fixed_selector(self.plugin.name())))?;
        tree.bind_transforms(&ctx.transforms)?;
        tree.fill_scalars(&row.clone().with("contextid", contextid), &ctx.process)?;

        let config = match self.plugin.root_source() {
            Some(source) => match &source.link {
                SourceLink::Parent(field) => ctx
                    .site
                    .accessor
                    .list(&source.entity, field, &self.blockid.to_string())?
                    .into_iter()
                    .next(),
                SourceLink::Instance => None,
            },
            None => None,
        };
        if let Some(config) = config {
            let root = slot_of(&mut tree, slot::CONFIG)?
                .resolve(&ctx.process)?
                .ok_or_else(|| StructureError::NotComposite(slot::CONFIG.to_string()))?;
            ctx.fill_plugin(&self.plugin, root, &config)?;
        }

        let document = cbr_document::write(&tree, &ctx.process)?;
        ctx.archive.add_unit(
            ContentsEntry {
                kind: UnitKind::Block,
                id: self.blockid,
                name: self.plugin.name().to_string(),
                document: archive::block_document(self.plugin.name(), self.blockid),
                section: None,
            },
            document,
        );
        Ok(())
    }
}

impl Task<BackupContext> for BlockTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut BackupContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let component = self.plugin.component();
                let contextid = self.contextid.unwrap_or_default();
                ctx.archive_files(&self.name, contextid, |d| d.component == component)?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }
}

/// Writes every user annotated by earlier tasks
pub(super) struct UsersTask;

impl UsersTask {
    fn annotations(ctx: &mut BackupContext) -> Result<(), BackupError> {
        let ids = ctx.idmap.annotated(ctx.backupid, itemtype::USER);
        let mut tree = schema::users()?;
        tree.bind_transforms(&ctx.transforms)?;
        let user = slot_of(&mut tree, "user")?;
        for id in &ids {
            match ctx.site.accessor.fetch(entity::USER, *id)? {
                Some(row) => {
                    user.add_instance(&row, &ctx.process)?;
                }
                None => ctx.log.warn(
                    ErrorKind::Site.as_str(),
                    Some("users"),
                    format!("referenced user {id} does not exist"),
                ),
            }
        }
        let document = cbr_document::write(&tree, &ctx.process)?;
        ctx.archive.add_unit(
            ContentsEntry {
                kind: UnitKind::Users,
                id: 0,
                name: "users".to_string(),
                document: archive::USERS_DOCUMENT.to_string(),
                section: None,
            },
            document,
        );
        tracing::debug!(users = ids.len(), "users written");
        Ok(())
    }
}

impl Task<BackupContext> for UsersTask {
    fn name(&self) -> &str {
        "users"
    }

    fn steps(&self) -> Vec<StepSpec> {
        vec![StepSpec::annotations("annotations")]
    }

    fn run_step(&mut self, _step: &StepSpec, ctx: &mut BackupContext) -> Result<(), StepError> {
        Ok(Self::annotations(ctx)?)
    }
}

/// Writes the file manifest collected by the file steps
pub(super) struct ManifestTask;

impl Task<BackupContext> for ManifestTask {
    fn name(&self) -> &str {
        "manifest"
    }

    fn steps(&self) -> Vec<StepSpec> {
        vec![StepSpec::structure(STRUCTURE)]
    }

    fn run_step(&mut self, _step: &StepSpec, ctx: &mut BackupContext) -> Result<(), StepError> {
        let document = cbr_document::write(&ctx.manifest, &ctx.process).map_err(BackupError::from)?;
        ctx.archive.add_unit(
            ContentsEntry {
                kind: UnitKind::Files,
                id: 0,
                name: "files".to_string(),
                document: archive::FILES_DOCUMENT.to_string(),
                section: None,
            },
            document,
        );
        let stats = ctx.relocator.stats();
        ctx.log.info(
            Some("manifest"),
            format!("{} files archived, {} missing", stats.archived, stats.missing),
        );
        Ok(())
    }
}
