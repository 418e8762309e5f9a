mod common;

use common::{Ghost, Links, Project, Task, declare, labels, related, seed, store};
use polylink::prelude::*;
use polylink::{DeletionReport, RelationId};
use std::sync::{Arc, Mutex};

/// Records `relation/side/policy/deleted/rows` for every event.
fn recorder(catalog: &Catalog) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    catalog.connect(move |event: &DeletionEvent<'_>| {
        sink.lock().unwrap().push(format!(
            "{}/{}/{:?}/{}/{}",
            event.relation.name(),
            event.side,
            event.policy,
            event.deleted.len(),
            event.rows.len()
        ));
        Ok(false)
    });
    seen
}

#[test]
fn deleting_a_source_cascades_its_rows() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(&store, related());
    field.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();
    field.get(&store, &w.links2).unwrap().add(&[&w.p10]).unwrap();

    let report = catalog.delete(&store, &[&w.links1]).unwrap();
    assert_eq!(report.deleted_objects, 1);
    assert_eq!(report.cascaded_rows, 2);
    assert_eq!(report.signals_emitted, 0);
    assert_eq!(store.row_count("app_links_related"), 1);
    assert_eq!(store.row_count("app_links"), 1);
    assert_eq!(store.row_count("app_project"), 2);
}

#[test]
fn no_op_policy_keeps_rows() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(&store, related().on_delete(CascadePolicy::NoOp));
    field.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();
    let seen = recorder(&catalog);
    store.reset_stats();

    let report = catalog.delete(&store, &[&w.links1, &w.p10]).unwrap();
    assert_eq!(report.deleted_objects, 2);
    assert_eq!(report.cascaded_rows, 0);
    assert_eq!(store.row_count("app_links_related"), 2);
    assert!(seen.lock().unwrap().is_empty());
    // Only the two object deletes
    assert_eq!(store.stats().statements(), 2);
}

#[test]
fn deleting_targets_cascades_across_relations() {
    let store = store();
    let w = seed(&store);
    let catalog = Catalog::new();
    let main = catalog.declare(&store, related()).unwrap();
    let pinned = catalog
        .declare(
            &store,
            RelationBuilder::new::<Links>("pinned").target::<Project>(),
        )
        .unwrap();
    main.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();
    main.get(&store, &w.links2).unwrap().add(&[&w.p10]).unwrap();
    pinned.get(&store, &w.links2).unwrap().add(&[&w.p10, &w.p11]).unwrap();

    let report = catalog.delete(&store, &[&w.p10, &w.t20]).unwrap();
    assert_eq!(report.deleted_objects, 2);
    assert_eq!(report.cascaded_rows, 4);
    assert_eq!(store.row_count("app_links_related"), 0);
    assert_eq!(
        labels(&pinned.get(&store, &w.links2).unwrap().list().unwrap()),
        vec!["Project:11"]
    );
}

#[test]
fn signal_carries_the_batch() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(
        &store,
        related().on_delete_tgt(CascadePolicy::CascadeWithSignal),
    );
    field.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();
    field.get(&store, &w.links2).unwrap().add(&[&w.p10, &w.p11]).unwrap();
    let seen = recorder(&catalog);

    let report = catalog.delete(&store, &[&w.p10, &w.p11, &w.t21]).unwrap();
    assert_eq!(report.signals_emitted, 1);
    assert_eq!(report.cascaded_rows, 3);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["related/target/CascadeWithSignal/3/3"]
    );
    assert_eq!(store.row_count("app_links_related"), 1);
}

#[test]
fn signal_is_sent_even_without_rows() {
    let store = store();
    let w = seed(&store);
    let (catalog, _field) = declare(
        &store,
        related().on_delete_src(CascadePolicy::CascadeWithSignal),
    );
    let seen = recorder(&catalog);

    let report = catalog.delete(&store, &[&w.links1]).unwrap();
    assert_eq!(report.signals_emitted, 1);
    assert_eq!(*seen.lock().unwrap(), vec!["related/source/CascadeWithSignal/1/0"]);
}

#[test]
fn signal_only_leaves_rows() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(&store, related().on_delete(CascadePolicy::SignalOnly));
    field.get(&store, &w.links1).unwrap().add(&[&w.p10]).unwrap();
    let seen = recorder(&catalog);
    catalog.connect(|_| Ok(true));

    let report = catalog.delete(&store, &[&w.p10]).unwrap();
    assert_eq!(report.cascaded_rows, 0);
    assert!(report.vetoed.is_empty());
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(store.row_count("app_links_related"), 1);
    assert_eq!(store.row_count("app_project"), 1);
}

#[test]
fn veto_keeps_rows_and_deletes_the_object() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(
        &store,
        related().on_delete_tgt(CascadePolicy::CascadeWithVetoSignal),
    );
    let manager = field.get(&store, &w.links1).unwrap();
    manager.add(&[&w.p10, &w.t20]).unwrap();
    catalog.connect(|event| Ok(event.deleted.iter().any(|o| o.is::<Project>())));

    let report = catalog.delete(&store, &[&w.p10]).unwrap();
    assert_eq!(report.vetoed, vec![(field.id(), DeletionSide::Target)]);
    assert_eq!(report.deleted_objects, 1);
    assert_eq!(report.cascaded_rows, 0);
    assert_eq!(store.row_count("app_project"), 1);
    assert_eq!(store.row_count("app_links_related"), 2);

    // The dangling row is skipped on read but still counted
    assert_eq!(labels(&manager.list().unwrap()), vec!["Task:20"]);
    assert_eq!(manager.count().unwrap(), 2);

    let report = catalog.delete(&store, &[&w.t20]).unwrap();
    assert!(report.vetoed.is_empty());
    assert_eq!(report.cascaded_rows, 1);
}

#[test]
fn veto_is_ignored_without_a_veto_policy() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(
        &store,
        related().on_delete_tgt(CascadePolicy::CascadeWithSignal),
    );
    field.get(&store, &w.links1).unwrap().add(&[&w.p10]).unwrap();
    catalog.connect(|_| Ok(true));

    let report = catalog.delete(&store, &[&w.p10]).unwrap();
    assert!(report.vetoed.is_empty());
    assert_eq!(report.cascaded_rows, 1);
}

#[test]
fn listener_errors_block_cascading_policies() {
    for (policy, vetoed, remaining) in [
        (CascadePolicy::CascadeWithSignal, true, 1),
        (CascadePolicy::CascadeWithVetoSignal, true, 1),
        (CascadePolicy::SignalOnly, false, 1),
    ] {
        let store = store();
        let w = seed(&store);
        let (catalog, field) = declare(&store, related().on_delete_tgt(policy));
        field.get(&store, &w.links1).unwrap().add(&[&w.p10]).unwrap();
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        catalog.connect(|_| Err(Error::config("listener broke")));
        catalog.connect(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(false)
        });

        let report = catalog.delete(&store, &[&w.p10]).unwrap();
        assert_eq!(!report.vetoed.is_empty(), vetoed, "{policy:?}");
        assert_eq!(store.row_count("app_links_related"), remaining, "{policy:?}");
        assert_eq!(store.row_count("app_project"), 1, "{policy:?}");
        // Later listeners still run
        assert_eq!(*calls.lock().unwrap(), 1, "{policy:?}");
    }
}

#[test]
fn per_target_policy_overrides_the_default() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(
        &store,
        RelationBuilder::new::<Links>("related")
            .target_with_policy::<Project>(CascadePolicy::NoOp)
            .target::<Task>(),
    );
    field.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();

    let report = catalog.delete(&store, &[&w.p10, &w.t20]).unwrap();
    assert_eq!(report.cascaded_rows, 1);
    assert_eq!(store.row_count("app_links_related"), 1);
    assert_eq!(
        field.relation().target_policy(catalog.registry().tag_of::<Project>().unwrap()),
        CascadePolicy::NoOp
    );
}

#[test]
fn scoped_listeners_hear_only_their_relation() {
    let store = store();
    let w = seed(&store);
    let catalog = Catalog::new();
    let main = catalog
        .declare(&store, related().on_delete(CascadePolicy::SignalOnly))
        .unwrap();
    let pinned = catalog
        .declare(
            &store,
            RelationBuilder::new::<Links>("pinned")
                .target::<Project>()
                .on_delete(CascadePolicy::SignalOnly),
        )
        .unwrap();
    let heard: Arc<Mutex<Vec<RelationId>>> = Arc::default();
    let sink = Arc::clone(&heard);
    let id = catalog.connect_to(pinned.id(), move |event| {
        sink.lock().unwrap().push(event.relation.id());
        Ok(false)
    });

    let report = catalog.delete(&store, &[&w.p10]).unwrap();
    assert_eq!(report.signals_emitted, 2);
    assert_eq!(*heard.lock().unwrap(), vec![pinned.id()]);
    assert_ne!(main.id(), pinned.id());

    assert!(catalog.disconnect(id));
    assert!(!catalog.disconnect(id));
    catalog.delete(&store, &[&w.p11]).unwrap();
    assert_eq!(heard.lock().unwrap().len(), 1);
}

#[test]
fn store_failure_rolls_back_the_whole_deletion() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(&store, related());
    field.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();

    // Ghost's table does not exist, so the final object delete fails
    let ghost = Ghost::new(99, "boo");
    let err = catalog
        .delete(&store, &[&w.links1, &w.p10, &ghost])
        .unwrap_err();
    assert!(err.is_store_error());
    assert_eq!(store.transaction_depth(), 0);
    assert_eq!(store.row_count("app_links_related"), 2);
    assert_eq!(store.row_count("app_links"), 2);
    assert_eq!(store.row_count("app_project"), 2);
}

#[test]
fn deleting_unrelated_objects_touches_no_join_table() {
    let store = store();
    let w = seed(&store);
    let (catalog, _field) = declare(
        &store,
        RelationBuilder::new::<Links>("related").target::<Project>(),
    );
    store.reset_stats();

    let report = catalog.delete(&store, &[&w.t20, &w.note]).unwrap();
    assert_eq!(
        report,
        DeletionReport {
            deleted_objects: 2,
            ..DeletionReport::default()
        }
    );
    assert_eq!(store.stats().statements(), 2);
    assert_eq!(store.row_count("app_task"), 1);
}

#[test]
fn failed_commit_rolls_back_the_whole_deletion() {
    let store = store();
    let w = seed(&store);
    let (catalog, field) = declare(&store, related());
    field.get(&store, &w.links1).unwrap().add(&[&w.p10, &w.t20]).unwrap();

    store.fail_next(polylink_memory::FailPoint::Commit);
    let err = catalog.delete(&store, &[&w.p10]).unwrap_err();
    assert!(err.is_store_error());
    assert_eq!(store.transaction_depth(), 0);
    assert_eq!(store.row_count("app_links_related"), 2);
    assert_eq!(store.row_count("app_project"), 2);
}
