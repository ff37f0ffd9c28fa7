//! Element tree behaviour across fill, process and record extraction

use cbr_element::{
    fixed_selector, AlternativeSet, Element, ElementKind, FnAlternative, ProcessContext, ProcessEvent, Record,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

const FIELDS: [&str; 5] = ["id", "shortname", "fullname", "format", "visible"];

fn course() -> Element {
    Element::composite("course", FIELDS.iter().map(|f| Element::scalar(*f)).collect()).unwrap()
}

proptest! {
    /// Filling then extracting keeps exactly the fields the tree declares
    #[test]
    fn record_round_trips_through_tree(
        values in prop::collection::vec(prop::option::of("[a-z0-9]{0,8}"), FIELDS.len()),
        extra in "[a-z]{1,6}",
    ) {
        let ctx = ProcessContext::detached();
        let mut record = Record::new();
        for (field, value) in FIELDS.iter().zip(&values) {
            record.set(*field, value.clone());
        }
        record.set(format!("x_{extra}"), Some("ignored".to_string()));

        let mut tree = course();
        tree.fill_values(&record, &ctx).unwrap();

        let mut expected = record.clone();
        expected.remove(&format!("x_{extra}"));
        prop_assert_eq!(tree.to_record(), expected);
    }

    /// A repeated element emits one group per instance
    #[test]
    fn repeated_group_count_matches_instances(rows in 0usize..12) {
        let ctx = ProcessContext::detached();
        let mut posts = Element::repeated("post", vec![Element::scalar("id")]).unwrap();
        for id in 0..rows {
            posts.add_instance(&Record::new().with("id", id), &ctx).unwrap();
        }
        let opens = posts
            .events(&ctx)
            .unwrap()
            .into_iter()
            .filter(|e| matches!(e, ProcessEvent::Open(n) if n == "post"))
            .count();
        prop_assert_eq!(opens, rows);
    }
}

#[test]
fn activity_plugin_slot() {
    let ctx = ProcessContext::detached();
    let plugins = AlternativeSet::new()
        .with(Arc::new(FnAlternative::new("forum", || {
            Element::composite("forum", vec![Element::scalar("type"), Element::scalar("intro")])
        })))
        .unwrap();
    let mut activity = Element::composite(
        "activity",
        vec![
            Element::scalar("id"),
            Element::scalar("modulename"),
            Element::optigroup("plugin", plugins, Some(fixed_selector("forum"))),
        ],
    )
    .unwrap();

    activity
        .fill_values(
            &Record::new().with("id", 14).with("modulename", "forum").with("type", "general"),
            &ctx,
        )
        .unwrap();

    let plugin = activity.child("plugin").unwrap();
    assert_eq!(plugin.kind(), ElementKind::Optigroup);
    assert_eq!(plugin.resolved().unwrap().child_text("type"), Some("general"));
    assert_eq!(
        activity.to_record().iter().map(|(k, _)| k).collect::<Vec<_>>(),
        ["id", "modulename", "type"]
    );
}

#[test]
fn failed_instance_is_not_appended() {
    #[derive(Debug)]
    struct Failing;
    impl cbr_element::ValueTransform for Failing {
        fn apply(
            &self,
            _input: &cbr_element::TransformInput<'_>,
        ) -> Result<cbr_element::TransformOutcome, cbr_element::TransformError> {
            Err("blob unavailable".into())
        }
    }

    let ctx = ProcessContext::detached();
    let mut registry = cbr_element::TransformRegistry::new();
    registry.register("file", "content", Arc::new(Failing)).unwrap();

    let mut files = Element::repeated("file", vec![Element::scalar("id"), Element::transformed("content")]).unwrap();
    files.bind_transforms(&Arc::new(registry)).unwrap();

    let err = files
        .add_instance(&Record::new().with("id", 1).with("content", "x"), &ctx)
        .unwrap_err();
    assert_eq!(err.transform_source().unwrap().to_string(), "blob unavailable");
    assert!(files.instances().is_empty());
}
