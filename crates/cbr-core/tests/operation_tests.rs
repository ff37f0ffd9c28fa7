//! Operation lifecycle, failure handling and graceful degradation

use cbr_core::site::entity;
use cbr_core::{
    Archive, BackupError, BackupSettings, CancelToken, Engine, Environment, ErrorKind, OperationState,
    PluginRegistry, RestoreSettings, RestoreTarget,
};
use cbr_document::FormatVersion;
use cbr_files::ContentHash;
use cbr_test_utils::{
    config, engine, forum, html_block, init_tracing, page, registry, seed_course, topics, weeks, DenyAll, MemorySite,
    SampleCourse, ADMIN, SOURCE_WWWROOT, TARGET_WWWROOT,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;

fn source() -> (Arc<MemorySite>, SampleCourse, Engine) {
    init_tracing();
    let site = MemorySite::new();
    let course = seed_course(&site);
    let engine = engine(&site, SOURCE_WWWROOT, registry());
    (site, course, engine)
}

fn archive(engine: &Engine, course: i64) -> Archive {
    let outcome = engine.backup(ADMIN, course, None);
    assert!(outcome.result.is_finished(), "{:?}", outcome.result.log);
    outcome.archive.unwrap()
}

#[test]
fn missing_blob_is_a_warning_not_a_failure() {
    let (site, ids, engine) = source();
    site.add_missing_file(ids.course_context, "course", "summary", 0, "gone.txt", b"abc123");

    let outcome = engine.backup(ADMIN, ids.course, None);
    assert_eq!(outcome.result.state, OperationState::Finished);
    assert_eq!(outcome.result.log.count_kind(ErrorKind::MissingFile.as_str()), 1);
    assert_eq!(outcome.result.log.warnings().count(), 1);

    let archive = outcome.archive.unwrap();
    let hashes = archive.manifest_hashes();
    assert_eq!(hashes.len(), 2);
    assert!(!hashes.contains(&ContentHash::compute(b"abc123")));

    // the gap is recorded in the archive and survives a disk round trip
    let placeholders = &archive.header().missing_files;
    assert_eq!(placeholders.len(), 1);
    assert_eq!(placeholders[0].filename, "gone.txt");
    assert_eq!(placeholders[0].contenthash, ContentHash::compute(b"abc123"));
    let dir = tempfile::tempdir().unwrap();
    archive.save(dir.path()).unwrap();
    let reopened = Archive::open(dir.path()).unwrap();
    assert_eq!(&reopened.header().missing_files, placeholders);

    // and a restore reports it without writing a row for it
    let dst = MemorySite::new();
    let result = cbr_test_utils::engine(&dst, TARGET_WWWROOT, registry()).restore(
        ADMIN,
        &reopened,
        RestoreTarget::NewCourse,
        None,
    );
    assert!(result.is_finished(), "{:?}", result.log);
    assert_eq!(result.log.count_kind(ErrorKind::MissingFile.as_str()), 1);
    assert_eq!(dst.files().len(), 2);
    assert!(dst.files().rows().iter().all(|d| d.filename != "gone.txt"));
}

#[test]
fn unknown_activity_plugin_is_skipped_on_restore() {
    let (_, ids, src) = source();
    let archive = archive(&src, ids.course);

    let dst = MemorySite::new();
    let plugins = PluginRegistry::new()
        .with(forum())
        .unwrap()
        .with(page())
        .unwrap()
        .with(html_block())
        .unwrap()
        .with_format(topics())
        .unwrap();
    let engine = engine(&dst, TARGET_WWWROOT, plugins);

    let result = engine.restore(ADMIN, &archive, RestoreTarget::NewCourse, None);
    assert!(result.is_finished(), "{:?}", result.log);
    assert_eq!(result.log.count_kind(ErrorKind::Plan.as_str()), 1);
    // the section that held the shortcut cannot list it
    assert_eq!(result.log.count_kind(ErrorKind::UnresolvedReference.as_str()), 1);
    assert!(dst.rows("shortcut").is_empty());
    assert_eq!(dst.rows(entity::MODULES).len(), 2);
}

#[test]
fn unknown_activity_plugin_is_skipped_on_backup() {
    let site = MemorySite::new();
    let ids = seed_course(&site);
    let plugins = PluginRegistry::new()
        .with(forum())
        .unwrap()
        .with(page())
        .unwrap()
        .with(html_block())
        .unwrap()
        .with_format(topics())
        .unwrap();
    let engine = engine(&site, SOURCE_WWWROOT, plugins);

    let outcome = engine.backup(ADMIN, ids.course, None);
    assert!(outcome.result.is_finished());
    assert_eq!(outcome.result.log.count_kind(ErrorKind::Plan.as_str()), 1);
    let archive = outcome.archive.unwrap();
    assert!(archive.header().contents.iter().all(|e| e.name != "shortcut"));
}

#[test]
fn other_course_format_drops_format_options() {
    let (_, ids, src) = source();
    let archive = archive(&src, ids.course);

    let dst = MemorySite::new();
    let engine = engine(&dst, TARGET_WWWROOT, registry());
    let result = engine.restore(
        ADMIN,
        &archive,
        RestoreTarget::NewCourse,
        Some(RestoreSettings::default().with_course_format("weeks")),
    );
    assert!(result.is_finished(), "{:?}", result.log);
    let course = dst.row(entity::COURSE, result.course_id.unwrap()).unwrap();
    assert_eq!(course.get("format"), Some("weeks"));
    assert!(dst.rows(entity::FORMAT_OPTIONS).is_empty());
    assert_eq!(dst.rows(entity::SECTIONS).len(), 2);
}

#[test]
fn unregistered_course_format_still_restores_sections() {
    let (_, ids, src) = source();
    let archive = archive(&src, ids.course);

    let dst = MemorySite::new();
    let plugins = registry_without_topics();
    let engine = engine(&dst, TARGET_WWWROOT, plugins);
    let result = engine.restore(ADMIN, &archive, RestoreTarget::NewCourse, None);
    assert!(result.is_finished(), "{:?}", result.log);
    assert_eq!(dst.rows(entity::SECTIONS).len(), 2);
    assert!(dst.rows(entity::FORMAT_OPTIONS).is_empty());

    // each section's `topics` options group is skipped and reported
    let skipped: Vec<_> = result
        .log
        .warnings()
        .filter(|w| w.kind == ErrorKind::SkippedEntry.as_str())
        .collect();
    assert_eq!(skipped.len(), 2, "{:?}", result.log);
    assert!(skipped.iter().all(|w| w.message.contains("topics_options")));
    assert!(result.log.warnings().count() >= skipped.len());
}

fn registry_without_topics() -> PluginRegistry {
    PluginRegistry::new()
        .with(forum())
        .unwrap()
        .with(page())
        .unwrap()
        .with(cbr_test_utils::shortcut())
        .unwrap()
        .with(html_block())
        .unwrap()
        .with_format(weeks())
        .unwrap()
}

#[test]
fn newer_archive_refused_before_any_write() {
    let (_, ids, src) = source();
    let built = archive(&src, ids.course);
    let mut header = built.header().clone();
    header.format_version = FormatVersion::new(FormatVersion::CURRENT.major + 1, 0);
    let newer = Archive::new(header, Arc::clone(built.pool()));

    let dst = MemorySite::new();
    let engine = engine(&dst, TARGET_WWWROOT, registry());
    let result = engine.restore(ADMIN, &newer, RestoreTarget::NewCourse, None);

    assert_eq!(result.state, OperationState::Aborted);
    assert_eq!(result.log.count_kind(ErrorKind::UnsupportedVersion.as_str()), 1);
    assert_eq!(dst.write_count(), 0);
    assert!(dst.files().is_empty());

    let err = engine
        .restore_controller(ADMIN, Arc::new(newer), RestoreTarget::NewCourse)
        .unwrap_err();
    assert!(matches!(err, BackupError::UnsupportedVersion(_)));
}

#[test]
fn permission_checked_at_creation() {
    let site = MemorySite::new();
    let ids = seed_course(&site);
    let engine = Engine::new(config(SOURCE_WWWROOT), site.site(Arc::new(DenyAll)), registry()).unwrap();

    let outcome = engine.backup(ADMIN, ids.course, None);
    assert!(outcome.archive.is_none());
    assert_eq!(outcome.result.state, OperationState::Aborted);
    assert_eq!(outcome.result.log.count_kind(ErrorKind::PermissionDenied.as_str()), 1);

    let err = engine.backup_controller(ADMIN, ids.course).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn missing_course_aborts_at_plan_time() {
    let (_, _, engine) = source();
    let mut controller = engine.backup_controller(ADMIN, 999).unwrap();
    controller.configure().unwrap();
    let err = controller.build_plan().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Site);
    assert_eq!(controller.state(), OperationState::Aborted);
    let result = controller.destroy();
    assert_eq!(result.log.errors().count(), 1);
}

#[test]
fn settings_freeze_once_configured() {
    let (_, ids, engine) = source();
    let mut controller = engine.backup_controller(ADMIN, ids.course).unwrap();
    controller
        .set_settings(BackupSettings::default().with_files(false))
        .unwrap();
    controller.configure().unwrap();

    let err = controller.set_settings(BackupSettings::default()).unwrap_err();
    assert!(matches!(
        err,
        BackupError::InvalidState {
            state: OperationState::Configured,
            ..
        }
    ));
    assert!(!controller.settings().include_files);
    assert!(matches!(controller.execute_plan(), Err(BackupError::InvalidState { .. })));
}

#[test]
fn lifecycle_history_of_a_finished_backup() {
    let (_, ids, engine) = source();
    let mut controller = engine.backup_controller(ADMIN, ids.course).unwrap();
    controller.configure().unwrap();
    controller.build_plan().unwrap();
    assert_eq!(controller.task_names().first().map(String::as_str), Some("course"));
    assert_eq!(controller.task_names().last().map(String::as_str), Some("manifest"));
    controller.execute_plan().unwrap();

    assert_eq!(
        controller.history(),
        [
            OperationState::Created,
            OperationState::Configured,
            OperationState::PlanBuilt,
            OperationState::StepsExecuting,
            OperationState::StepsComplete,
            OperationState::AfterTasksExecuting,
            OperationState::Finished,
        ]
    );
    assert!(controller.archive().is_some());
    assert!(controller.destroy().is_finished());
    assert!(engine.idmap().is_empty());
}

/// Cancels the run while `task` executes
struct CancelDuring {
    task: &'static str,
    token: Mutex<Option<CancelToken>>,
}

impl Environment for CancelDuring {
    fn raise_time_budget(&self, task: &str, _step: &str) {
        if task == self.task {
            if let Some(token) = self.token.lock().as_ref() {
                token.cancel();
            }
        }
    }
}

#[test]
fn cancellation_aborts_at_task_boundary_and_purges() {
    let (_, ids, src) = source();
    let archive = Arc::new(archive(&src, ids.course));

    let dst = MemorySite::new();
    let hook = Arc::new(CancelDuring {
        task: "section_20",
        token: Mutex::new(None),
    });
    let engine = engine(&dst, TARGET_WWWROOT, registry()).with_environment(hook.clone());

    let mut controller = engine
        .restore_controller(ADMIN, archive, RestoreTarget::NewCourse)
        .unwrap();
    *hook.token.lock() = Some(controller.cancel_token());
    controller.configure().unwrap();
    controller.build_plan().unwrap();

    let err = controller.execute_plan().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(controller.state(), OperationState::Aborted);
    assert!(engine.idmap().count(controller.backupid()) > 0);
    // the course and the first section were written before the cancel
    assert_eq!(dst.rows(entity::SECTIONS).len(), 1);
    assert!(dst.rows(entity::MODULES).is_empty());

    let result = controller.destroy();
    assert_eq!(result.state, OperationState::Aborted);
    assert_eq!(result.log.count_kind("Cancelled"), 1);
    assert!(engine.idmap().is_empty());
}

#[test]
fn existing_course_locked_for_one_restore_at_a_time() {
    let (_, ids, engine) = source();
    let archive = Arc::new(archive(&engine, ids.course));
    let target = RestoreTarget::ExistingCourse(ids.course);

    let mut first = engine.restore_controller(ADMIN, archive.clone(), target).unwrap();
    let mut second = engine.restore_controller(ADMIN, archive.clone(), target).unwrap();
    first.configure().unwrap();
    assert!(matches!(second.configure(), Err(BackupError::Locked(7))));
    assert_eq!(second.state(), OperationState::Aborted);
    drop(second);
    assert!(engine.locks().is_locked(ids.course));

    first.destroy();
    assert!(!engine.locks().is_locked(ids.course));
    let mut third = engine.restore_controller(ADMIN, archive, target).unwrap();
    third.configure().unwrap();
}

#[test]
fn concurrent_backups_stay_isolated() {
    let (_, ids, engine) = source();
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                scope.spawn(move || engine.backup(ADMIN, ids.course, None))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let backupids: HashSet<_> = results.iter().map(|o| o.result.backupid).collect();
    assert_eq!(backupids.len(), 4);
    for outcome in &results {
        assert!(outcome.result.is_finished());
        let archive = outcome.archive.as_ref().unwrap();
        assert_eq!(archive.header().backupid, outcome.result.backupid);
        assert_eq!(archive.manifest_hashes().len(), 2);
    }
    assert!(engine.idmap().is_empty());
}
