//! Testing utilities for the CBR workspace
//!
//! In-memory site, sample plugins and a seeded sample course.

#![allow(missing_docs)]

use cbr_core::links::LinkRule;
use cbr_core::site::{context_level, entity, CONTEXT_ENTITY};
use cbr_core::{
    itemtype, Actor, CapabilityCheck, ContentPlugin, Engine, EngineConfig, EntityAccessor, EntitySource,
    EntityWriter, FormatPlugin, PluginRegistry, Scope, Site, SiteError, SourceLink,
};
use cbr_element::{Element, Record};
use cbr_files::{ContentHash, ContentPool, FileDescriptor, FileTable, MemoryFileTable, MemoryPool};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

/// Site URL of the sample source site
pub const SOURCE_WWWROOT: &str = "https://source.example";
/// Site URL of the sample destination site
pub const TARGET_WWWROOT: &str = "https://target.example";

/// Operator used by the tests
pub const ADMIN: Actor = Actor::new(2);

static TRACING: Once = Once::new();

/// Route engine tracing to the test writer, honouring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Entity tables, blob pool and file table held in memory
#[derive(Debug, Default)]
pub struct MemorySite {
    tables: RwLock<HashMap<String, BTreeMap<i64, Record>>>,
    next_ids: RwLock<HashMap<String, i64>>,
    writes: AtomicUsize,
    pool: Arc<MemoryPool>,
    files: Arc<MemoryFileTable>,
}

impl MemorySite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ids handed out by `insert` into `entity` start at `next`
    pub fn seed_next_id(&self, entity: &str, next: i64) {
        self.next_ids.write().insert(entity.to_string(), next);
    }

    /// Fixture row with a fixed id; not counted as a write
    pub fn insert_row(&self, entity: &str, id: i64, record: Record) {
        let record = record.with("id", id);
        self.tables.write().entry(entity.to_string()).or_default().insert(id, record);
    }

    pub fn row(&self, entity: &str, id: i64) -> Option<Record> {
        self.tables.read().get(entity).and_then(|t| t.get(&id)).cloned()
    }

    /// Rows of `entity` ordered by id
    pub fn rows(&self, entity: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(entity)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Rows of `entity` whose `field` equals `value`
    pub fn rows_where(&self, entity: &str, field: &str, value: &str) -> Vec<Record> {
        self.rows(entity)
            .into_iter()
            .filter(|r| r.get(field) == Some(value))
            .collect()
    }

    /// Inserts and updates made through [`EntityWriter`]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> &Arc<MemoryPool> {
        &self.pool
    }

    pub fn files(&self) -> &Arc<MemoryFileTable> {
        &self.files
    }

    /// Store `bytes` and add a descriptor row for them
    pub fn add_file(&self, contextid: i64, component: &str, filearea: &str, itemid: i64, filename: &str, bytes: &[u8]) -> FileDescriptor {
        let hash = self.pool.put(bytes).unwrap();
        let descriptor = FileDescriptor::new(contextid, component, filearea, itemid, filename, hash)
            .with_size(bytes.len() as u64);
        self.files.insert(descriptor.clone()).unwrap();
        descriptor
    }

    /// Descriptor row whose blob is not in the pool
    pub fn add_missing_file(&self, contextid: i64, component: &str, filearea: &str, itemid: i64, filename: &str, bytes: &[u8]) -> FileDescriptor {
        let descriptor = FileDescriptor::new(contextid, component, filearea, itemid, filename, ContentHash::compute(bytes));
        self.files.insert(descriptor.clone()).unwrap();
        descriptor
    }

    /// [`Site`] backed by this store
    pub fn site(self: &Arc<Self>, capabilities: Arc<dyn CapabilityCheck>) -> Site {
        Site {
            accessor: self.clone(),
            writer: self.clone(),
            capabilities,
            pool: self.pool.clone(),
            files: self.files.clone(),
        }
    }
}

impl EntityAccessor for MemorySite {
    fn fetch(&self, entity: &str, id: i64) -> Result<Option<Record>, SiteError> {
        Ok(self.row(entity, id))
    }

    fn list(&self, entity: &str, field: &str, value: &str) -> Result<Vec<Record>, SiteError> {
        Ok(self.rows_where(entity, field, value))
    }
}

impl EntityWriter for MemorySite {
    fn insert(&self, entity: &str, record: &Record) -> Result<i64, SiteError> {
        let mut tables = self.tables.write();
        let table = tables.entry(entity.to_string()).or_default();
        let mut next_ids = self.next_ids.write();
        let next = next_ids.entry(entity.to_string()).or_insert(1);
        let id = (*next).max(table.keys().next_back().map_or(1, |last| last + 1));
        *next = id + 1;

        let mut row = record.clone();
        row.set("id", Some(id.to_string()));
        table.insert(id, row);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn update(&self, entity: &str, id: i64, fields: &Record) -> Result<(), SiteError> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity)
            .and_then(|t| t.get_mut(&id))
            .ok_or_else(|| SiteError::NotFound {
                entity: entity.to_string(),
                id,
            })?;
        for (field, value) in fields.iter() {
            row.set(field, value.map(str::to_string));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Grants everything
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CapabilityCheck for AllowAll {
    fn allowed(&self, _actor: Actor, _permission: &str, _scope: Scope) -> bool {
        true
    }
}

/// Grants nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl CapabilityCheck for DenyAll {
    fn allowed(&self, _actor: Actor, _permission: &str, _scope: Scope) -> bool {
        false
    }
}

/// Forum with discussions and posts; posts are user data
pub fn forum() -> ContentPlugin {
    ContentPlugin::activity("forum", || {
        let post = Element::repeated(
            "post",
            vec![Element::scalar("id"), Element::scalar("userid"), Element::scalar("message")],
        )?;
        let discussion = Element::repeated(
            "discussion",
            vec![
                Element::scalar("id"),
                Element::scalar("name"),
                Element::scalar("userid"),
                Element::composite("posts", vec![post])?,
            ],
        )?;
        Element::composite(
            "forum",
            vec![
                Element::scalar("id"),
                Element::scalar("name"),
                Element::scalar("intro"),
                Element::composite("discussions", vec![discussion])?,
            ],
        )
    })
    .with_source(EntitySource::new("forum", "forum", "forum", SourceLink::Instance).encoded("intro"))
    .with_source(
        EntitySource::new(
            "forum/discussions/discussion",
            "forum_discussions",
            "forum_discussion",
            SourceLink::Parent("forum".into()),
        )
        .reference("userid", itemtype::USER)
        .user_data(),
    )
    .with_source(
        EntitySource::new(
            "forum/discussions/discussion/posts/post",
            "forum_posts",
            "forum_post",
            SourceLink::Parent("discussion".into()),
        )
        .reference("userid", itemtype::USER)
        .encoded("message")
        .user_data(),
    )
    .with_file_area("attachment", Some("forum_post"))
}

/// Page with a rich-text body and attachments in `content`
pub fn page() -> ContentPlugin {
    ContentPlugin::activity("page", || {
        Element::composite(
            "page",
            vec![Element::scalar("id"), Element::scalar("name"), Element::scalar("content")],
        )
    })
    .with_source(EntitySource::new("page", "page", "page", SourceLink::Instance).encoded("content"))
    .with_file_area("content", None)
}

/// Link to another activity of the same course
///
/// `target` is a course-module id that may belong to an activity restored
/// later, so it is remapped after all tasks ran.
pub fn shortcut() -> ContentPlugin {
    ContentPlugin::activity("shortcut", || {
        Element::composite(
            "shortcut",
            vec![Element::scalar("id"), Element::scalar("name"), Element::scalar("target")],
        )
    })
    .with_source(
        EntitySource::new("shortcut", "shortcut", "shortcut", SourceLink::Instance)
            .deferred("target", itemtype::ACTIVITY),
    )
}

/// Html block; its configuration row hangs off the block instance
pub fn html_block() -> ContentPlugin {
    ContentPlugin::block("html", || {
        Element::composite(
            "html",
            vec![Element::scalar("id"), Element::scalar("title"), Element::scalar("text")],
        )
    })
    .with_source(
        EntitySource::new("html", "block_html", "block_html", SourceLink::Parent("blockid".into())).encoded("text"),
    )
    .with_link_rule(LinkRule::new("HTMLBLOCKBYID", "/blocks/html/view.php", "id", itemtype::BLOCK))
}

pub fn topics() -> FormatPlugin {
    FormatPlugin::new("topics", &["layout"])
}

pub fn weeks() -> FormatPlugin {
    FormatPlugin::new("weeks", &["automaticenddate"])
}

/// Every sample plugin and format
pub fn registry() -> PluginRegistry {
    PluginRegistry::new()
        .with(forum())
        .unwrap()
        .with(page())
        .unwrap()
        .with(shortcut())
        .unwrap()
        .with(html_block())
        .unwrap()
        .with_format(topics())
        .unwrap()
        .with_format(weeks())
        .unwrap()
}

pub fn config(wwwroot: &str) -> EngineConfig {
    EngineConfig::default().with_wwwroot(wwwroot)
}

/// Engine over `site` allowing everything
pub fn engine(site: &Arc<MemorySite>, wwwroot: &str, plugins: PluginRegistry) -> Engine {
    init_tracing();
    Engine::new(config(wwwroot), site.site(Arc::new(AllowAll)), plugins).unwrap()
}

/// Ids of the rows [`seed_course`] creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCourse {
    pub course: i64,
    pub course_context: i64,
    pub general: i64,
    pub week1: i64,
    pub forum_cm: i64,
    pub page_cm: i64,
    pub shortcut_cm: i64,
    pub block: i64,
    pub ada: i64,
    pub bob: i64,
}

/// Seed a `topics` course with a forum, a page, a shortcut to the forum,
/// an html block, two users and two attachments
pub fn seed_course(site: &MemorySite) -> SampleCourse {
    let ids = SampleCourse {
        course: 7,
        course_context: 70,
        general: 20,
        week1: 21,
        forum_cm: 10,
        page_cm: 11,
        shortcut_cm: 12,
        block: 5,
        ada: 3,
        bob: 4,
    };
    let forum_link = format!("{SOURCE_WWWROOT}/mod/forum/view.php?id={}", ids.forum_cm);

    site.insert_row(
        entity::USER,
        ids.ada,
        Record::new()
            .with("username", "ada")
            .with("firstname", "Ada")
            .with("lastname", "Lovelace")
            .with("email", "ada@example.org"),
    );
    site.insert_row(
        entity::USER,
        ids.bob,
        Record::new()
            .with("username", "bob")
            .with("firstname", "Bob")
            .with("lastname", "Babbage")
            .with("email", "bob@example.org"),
    );

    site.insert_row(
        entity::COURSE,
        ids.course,
        Record::new()
            .with("shortname", "CS101")
            .with("fullname", "Computing")
            .with("format", "topics")
            .with("summary", format!("Start at <a href=\"{forum_link}\">news</a>"))
            .with("startdate", 1_700_000_000)
            .with("visible", 1),
    );
    context(site, ids.course_context, context_level::COURSE, ids.course);

    site.insert_row(
        entity::SECTIONS,
        ids.general,
        Record::new()
            .with("course", ids.course)
            .with("section", 0)
            .with("name", "General")
            .with("summary", "")
            .with("visible", 1)
            .with("sequence", format!("{},{}", ids.forum_cm, ids.page_cm)),
    );
    site.insert_row(
        entity::SECTIONS,
        ids.week1,
        Record::new()
            .with("course", ids.course)
            .with("section", 1)
            .with("name", "Week 1")
            .with("summary", "")
            .with("visible", 1)
            .with("sequence", ids.shortcut_cm),
    );
    site.insert_row(
        entity::FORMAT_OPTIONS,
        1,
        Record::new()
            .with("courseid", ids.course)
            .with("format", "topics")
            .with("sectionid", ids.general)
            .with("name", "layout")
            .with("value", 1),
    );

    site.insert_row("forum", 30, Record::new().with("course", ids.course).with("name", "News").with("intro", "Welcome"));
    site.insert_row(
        "forum_discussions",
        40,
        Record::new().with("forum", 30).with("name", "Hello").with("userid", ids.ada),
    );
    site.insert_row(
        "forum_posts",
        50,
        Record::new().with("discussion", 40).with("userid", ids.ada).with("message", "First"),
    );
    site.insert_row(
        "forum_posts",
        51,
        Record::new().with("discussion", 40).with("userid", ids.bob).with("message", "Reply"),
    );
    module(site, ids.forum_cm, ids.course, "forum", 30, ids.general);
    context(site, 100, context_level::MODULE, ids.forum_cm);

    site.insert_row(
        "page",
        31,
        Record::new()
            .with("course", ids.course)
            .with("name", "Syllabus")
            .with("content", format!("Questions go to <a href=\"{forum_link}\">news</a>")),
    );
    module(site, ids.page_cm, ids.course, "page", 31, ids.general);
    context(site, 110, context_level::MODULE, ids.page_cm);

    site.insert_row(
        "shortcut",
        32,
        Record::new().with("course", ids.course).with("name", "Go to news").with("target", ids.forum_cm),
    );
    module(site, ids.shortcut_cm, ids.course, "shortcut", 32, ids.week1);
    context(site, 120, context_level::MODULE, ids.shortcut_cm);

    site.insert_row(
        entity::BLOCKS,
        ids.block,
        Record::new()
            .with("blockname", "html")
            .with("parentcontextid", ids.course_context)
            .with("region", "side-pre")
            .with("weight", 0),
    );
    context(site, 150, context_level::BLOCK, ids.block);
    site.insert_row(
        "block_html",
        60,
        Record::new().with("blockid", ids.block).with("title", "Links").with("text", "Useful links"),
    );

    site.add_file(ids.course_context, "course", "summary", 0, "intro.txt", b"hello course");
    site.add_file(110, "mod_page", "content", 0, "syllabus.pdf", b"%PDF syllabus");
    ids
}

fn context(site: &MemorySite, id: i64, level: &str, instanceid: i64) {
    site.insert_row(
        CONTEXT_ENTITY,
        id,
        Record::new().with("contextlevel", level).with("instanceid", instanceid),
    );
}

fn module(site: &MemorySite, cmid: i64, course: i64, modulename: &str, instance: i64, section: i64) {
    site.insert_row(
        entity::MODULES,
        cmid,
        Record::new()
            .with("course", course)
            .with("modulename", modulename)
            .with("instance", instance)
            .with("section", section)
            .with("visible", 1)
            .with("idnumber", ""),
    );
}
