//! Restore tasks, one per archive unit

use super::{take_id, Fixups, LinkField, RestoreContext, RestoreTarget, SequenceFix};
use crate::archive::ContentsEntry;
use crate::error::{BackupError, ErrorKind};
use crate::ids::itemtype;
use crate::plugin::ContentPlugin;
use crate::schema::{self, slot};
use crate::site::{context_level, create_context, entity, find_context, SiteError};
use cbr_element::{fixed_selector, Element, Record};
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

fn unknown_step(task: &str, step: &StepSpec) -> StepError {
    StepError::new(format!("{task} has no step `{}`", step.name))
}

fn old_context(tree: &Element) -> i64 {
    tree.child_text("contextid")
        .and_then(|id| id.parse().ok())
        .unwrap_or_default()
}

/// Fields of `tree` listed in `fields`, in that order
fn pick(tree: &Element, fields: &[&str]) -> Record {
    let all = tree.scalar_record();
    fields
        .iter()
        .filter_map(|f| all.slot(f).map(|v| (*f, v.map(str::to_string))))
        .collect()
}

fn link_field(ctx: &RestoreContext, entity: &str, id: i64, field: &str, record: &Record) -> Option<LinkField> {
    let text = record.get(field).filter(|t| ctx.codec.has_tokens(t))?;
    Some(LinkField {
        entity: entity.to_string(),
        id,
        field: field.to_string(),
        text: text.to_string(),
    })
}

pub(super) struct CourseTask {
    name: String,
    entry: ContentsEntry,
    old_context: i64,
    files: bool,
    fixups: Fixups,
}

impl CourseTask {
    pub(super) fn new(entry: ContentsEntry, files: bool) -> Self {
        Self {
            name: "course".to_string(),
            entry,
            old_context: 0,
            files,
            fixups: Fixups::default(),
        }
    }

    fn structure(&mut self, ctx: &mut RestoreContext) -> Result<(), BackupError> {
        let tree = ctx.read_unit(&self.name, &self.entry, schema::course()?)?;
        self.old_context = old_context(&tree);
        let old_id = tree
            .child_text("id")
            .and_then(|id| id.parse().ok())
            .unwrap_or(self.entry.id);

        let (course_id, format) = match ctx.target {
            RestoreTarget::NewCourse => {
                let mut record = pick(&tree, &["shortname", "fullname", "format", "summary", "startdate", "visible"]);
                let format = ctx
                    .settings
                    .course_format
                    .clone()
                    .or_else(|| record.get("format").map(str::to_string))
                    .unwrap_or_else(|| ctx.target_format.clone());
                record.set("format", Some(format.clone()));
                let id = ctx.site.writer.insert(entity::COURSE, &record)?;
                if let Some(link) = link_field(ctx, entity::COURSE, id, "summary", &record) {
                    self.fixups.links.push(link);
                }
                (id, format)
            }
            RestoreTarget::ExistingCourse(id) => {
                let row = ctx.site.accessor.fetch(entity::COURSE, id)?.ok_or(SiteError::NotFound {
                    entity: entity::COURSE.to_string(),
                    id,
                })?;
                let format = row.get("format").unwrap_or_default().to_string();
                (id, format)
            }
        };
        ctx.record(itemtype::COURSE, old_id, course_id)?;

        let context = match find_context(ctx.site.accessor.as_ref(), context_level::COURSE, course_id)? {
            Some(context) => context,
            None => create_context(ctx.site.writer.as_ref(), context_level::COURSE, course_id)?,
        };
        ctx.record(itemtype::CONTEXT, self.old_context, context)?;

        ctx.course_id = Some(course_id);
        ctx.course_context = Some(context);
        ctx.source_course_context = Some(self.old_context);
        ctx.target_format = format;
        tracing::info!(course = course_id, format = %ctx.target_format, "course restored");
        Ok(())
    }
}

impl Task<RestoreContext> for CourseTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut RestoreContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => ctx.restore_files(&self.name, self.old_context, |d| d.in_area("course", "summary"))?,
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }

    fn after_all(&mut self, ctx: &mut RestoreContext) -> Result<(), StepError> {
        Ok(ctx.apply_fixups(&self.name, &mut self.fixups)?)
    }
}

pub(super) struct UsersTask {
    entry: ContentsEntry,
}

impl UsersTask {
    pub(super) fn new(entry: ContentsEntry) -> Self {
        Self { entry }
    }

    fn users(&self, ctx: &mut RestoreContext) -> Result<(), BackupError> {
        let tree = ctx.read_unit("users", &self.entry, schema::users()?)?;
        let Some(users) = tree.child("user") else {
            return Ok(());
        };
        let (mut matched, mut created) = (0, 0);
        for user in users.instances() {
            let mut record = user.scalar_record();
            let Some(old) = take_id(&mut record) else { continue };
            let username = record.get("username").unwrap_or_default();
            let existing = ctx
                .site
                .accessor
                .list(entity::USER, "username", username)?
                .into_iter()
                .find_map(|row| row.id());
            let id = match existing {
                Some(id) => {
                    matched += 1;
                    id
                }
                None => {
                    created += 1;
                    ctx.site.writer.insert(entity::USER, &record)?
                }
            };
            ctx.record(itemtype::USER, old, id)?;
        }
        ctx.log.info(Some("users"), format!("{matched} users matched, {created} created"));
        Ok(())
    }
}

impl Task<RestoreContext> for UsersTask {
    fn name(&self) -> &str {
        "users"
    }

    fn steps(&self) -> Vec<StepSpec> {
        vec![StepSpec::structure(STRUCTURE)]
    }

    fn run_step(&mut self, _step: &StepSpec, ctx: &mut RestoreContext) -> Result<(), StepError> {
        Ok(self.users(ctx)?)
    }
}

pub(super) struct SectionTask {
    name: String,
    entry: ContentsEntry,
    old_context: i64,
    sectionid: Option<i64>,
    files: bool,
    fixups: Fixups,
}

impl SectionTask {
    pub(super) fn new(entry: ContentsEntry, files: bool) -> Self {
        Self {
            name: format!("section_{}", entry.id),
            entry,
            old_context: 0,
            sectionid: None,
            files,
            fixups: Fixups::default(),
        }
    }

    fn structure(&mut self, ctx: &mut RestoreContext) -> Result<(), BackupError> {
        let format = ctx.target_format.clone();
        let schema = schema::section(&ctx.plugins, Some(fixed_selector(format.as_str())))?;
        let tree = ctx.read_unit(&self.name, &self.entry, schema)?;
        let course = ctx.course()?;
        self.old_context = ctx.source_course_context.unwrap_or_default();

        let mut record = pick(&tree, &["section", "name", "summary", "visible"]);
        let number = record.get_i64("section").unwrap_or_default();
        let existing = ctx
            .site
            .accessor
            .list(entity::SECTIONS, "course", &course.to_string())?
            .into_iter()
            .find(|row| row.get_i64("section") == Some(number));

        let (id, current_sequence) = match existing {
            Some(row) => (
                row.id().unwrap_or_default(),
                row.get("sequence").unwrap_or_default().to_string(),
            ),
            None => {
                record.set("course", Some(course.to_string()));
                record.set("sequence", Some(String::new()));
                let id = ctx.site.writer.insert(entity::SECTIONS, &record)?;
                if let Some(link) = link_field(ctx, entity::SECTIONS, id, "summary", &record) {
                    self.fixups.links.push(link);
                }
                (id, String::new())
            }
        };
        ctx.record(itemtype::SECTION, self.entry.id, id)?;
        self.sectionid = Some(id);

        let sequence = tree.child_text("sequence").unwrap_or_default();
        if !sequence.is_empty() {
            self.fixups.sequence = Some(SequenceFix {
                sectionid: id,
                old: sequence.to_string(),
                existing: current_sequence,
            });
        }

        let options = tree
            .child(slot::FORMAT_OPTIONS)
            .and_then(Element::resolved)
            .map(Element::scalar_record)
            .unwrap_or_default();
        for (name, value) in options.iter() {
            let mut row = Record::new()
                .with("courseid", course)
                .with("format", &format)
                .with("sectionid", id)
                .with("name", name);
            row.set("value", value.map(str::to_string));
            ctx.site.writer.insert(entity::FORMAT_OPTIONS, &row)?;
        }
        Ok(())
    }
}

impl Task<RestoreContext> for SectionTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut RestoreContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let old = self.entry.id;
                ctx.restore_files(&self.name, self.old_context, |d| {
                    d.in_area("course", "section") && d.itemid == old
                })?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }

    fn after_all(&mut self, ctx: &mut RestoreContext) -> Result<(), StepError> {
        Ok(ctx.apply_fixups(&self.name, &mut self.fixups)?)
    }
}

pub(super) struct ActivityTask {
    name: String,
    entry: ContentsEntry,
    plugin: Arc<ContentPlugin>,
    old_context: i64,
    files: bool,
    fixups: Fixups,
}

impl ActivityTask {
    pub(super) fn new(entry: ContentsEntry, plugin: Arc<ContentPlugin>, files: bool) -> Self {
        Self {
            name: format!("activity_{}", entry.id),
            entry,
            plugin,
            old_context: 0,
            files,
            fixups: Fixups::default(),
        }
    }

    fn structure(&mut self, ctx: &mut RestoreContext) -> Result<(), BackupError> {
        let schema = schema::activity(&ctx.plugins, Some(fixed_selector(self.plugin.name())))?;
        let tree = ctx.read_unit(&self.name, &self.entry, schema)?;
        self.old_context = old_context(&tree);
        let Some(root) = tree.child(slot::PLUGIN).and_then(Element::resolved) else {
            ctx.log.warn(
                ErrorKind::Plan.as_str(),
                Some(self.name.as_str()),
                format!("no `{}` data in {}, activity skipped", self.plugin.name(), self.entry.document),
            );
            return Ok(());
        };

        let instance = ctx.restore_plugin(&self.plugin, root, 0, &mut self.fixups)?;
        let mut cm = pick(&tree, &["modulename", "visible", "idnumber"]);
        cm.set("course", Some(ctx.course()?.to_string()));
        cm.set("instance", Some(instance.to_string()));
        let section = tree
            .child_text("section")
            .and_then(|s| s.parse().ok())
            .or(self.entry.section)
            .and_then(|old| ctx.lookup(itemtype::SECTION, old))
            .unwrap_or_default();
        cm.set("section", Some(section.to_string()));
        let cmid = ctx.site.writer.insert(entity::MODULES, &cm)?;
        ctx.record(itemtype::ACTIVITY, self.entry.id, cmid)?;

        let context = create_context(ctx.site.writer.as_ref(), context_level::MODULE, cmid)?;
        ctx.record(itemtype::CONTEXT, self.old_context, context)?;
        tracing::debug!(old = self.entry.id, new = cmid, module = %self.plugin.name(), "activity restored");
        Ok(())
    }
}

impl Task<RestoreContext> for ActivityTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut RestoreContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let plugin = Arc::clone(&self.plugin);
                ctx.restore_files(&self.name, self.old_context, |d| {
                    plugin.file_areas().iter().any(|a| a.matches(&d.component, &d.filearea))
                })?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }

    fn after_all(&mut self, ctx: &mut RestoreContext) -> Result<(), StepError> {
        Ok(ctx.apply_fixups(&self.name, &mut self.fixups)?)
    }
}

pub(super) struct BlockTask {
    name: String,
    entry: ContentsEntry,
    plugin: Arc<ContentPlugin>,
    old_context: i64,
    files: bool,
    fixups: Fixups,
}

impl BlockTask {
    pub(super) fn new(entry: ContentsEntry, plugin: Arc<ContentPlugin>, files: bool) -> Self {
        Self {
            name: format!("block_{}", entry.id),
            entry,
            plugin,
            old_context: 0,
            files,
            fixups: Fixups::default(),
        }
    }

    fn structure(&mut self, ctx: &mut RestoreContext) -> Result<(), BackupError> {
        let schema = schema::block(&ctx.plugins, Some(fixed_selector(self.plugin.name())))?;
        let tree = ctx.read_unit(&self.name, &self.entry, schema)?;
        self.old_context = old_context(&tree);
        let parent = ctx
            .course_context
            .ok_or_else(|| BackupError::InvalidArchive("course not restored yet".to_string()))?;

        let mut record = pick(&tree, &["blockname", "region", "weight"]);
        record.set("parentcontextid", Some(parent.to_string()));
        let id = ctx.site.writer.insert(entity::BLOCKS, &record)?;
        ctx.record(itemtype::BLOCK, self.entry.id, id)?;
        let context = create_context(ctx.site.writer.as_ref(), context_level::BLOCK, id)?;
        ctx.record(itemtype::CONTEXT, self.old_context, context)?;

        if let Some(root) = tree.child(slot::CONFIG).and_then(Element::resolved) {
            ctx.restore_plugin(&self.plugin, root, id, &mut self.fixups)?;
        }
        Ok(())
    }
}

impl Task<RestoreContext> for BlockTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn steps(&self) -> Vec<StepSpec> {
        unit_steps(self.files)
    }

    fn run_step(&mut self, step: &StepSpec, ctx: &mut RestoreContext) -> Result<(), StepError> {
        match step.name.as_str() {
            STRUCTURE => self.structure(ctx)?,
            FILES => {
                let component = self.plugin.component();
                ctx.restore_files(&self.name, self.old_context, |d| d.component == component)?;
            }
            _ => return Err(unknown_step(&self.name, step)),
        }
        Ok(())
    }

    fn after_all(&mut self, ctx: &mut RestoreContext) -> Result<(), StepError> {
        Ok(ctx.apply_fixups(&self.name, &mut self.fixups)?)
    }
}
