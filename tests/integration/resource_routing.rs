#![allow(missing_docs)]

//! Publisher/administrator behavior: creation, routing, overrides, policy
//! filters and tree-change notifications.

use std::cell::RefCell;
use std::rc::Rc;

use datahub::sample::codec::extract_json;
use datahub::{DataHub, DataType, EntryType, HubError, TreeChangeOp, BEGINNING_OF_TIME, FORMAT_JSON};

#[test]
fn basic_publish_and_observe() {
    let hub = DataHub::new();
    hub.create_input("/app/a/x", DataType::Numeric, "count").unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    hub.add_numeric_push_handler("/app/a/x", move |ts, value| {
        sink.borrow_mut().push((ts, value));
    })
    .unwrap();

    hub.push_numeric("/app/a/x", 1.0, 42.0).unwrap();
    hub.run_until_idle();

    assert_eq!(*seen.borrow(), vec![(1.0, 42.0)]);
    assert_eq!(hub.get_timestamp("/app/a/x").unwrap(), 1.0);
    assert_eq!(hub.get_data_type("/app/a/x").unwrap(), DataType::Numeric);
    assert_eq!(hub.get_units("/app/a/x").unwrap(), "count");
}

#[test]
fn recreation_is_idempotent_and_mismatch_is_duplicate() {
    let hub = DataHub::new();
    hub.create_output("/counter/value", DataType::Numeric, "count").unwrap();

    // Identical parameters succeed quietly.
    hub.create_output("/counter/value", DataType::Numeric, "count").unwrap();
    // Any mismatch is refused.
    assert!(matches!(
        hub.create_output("/counter/value", DataType::String, "count"),
        Err(HubError::Duplicate)
    ));
    assert!(matches!(
        hub.create_output("/counter/value", DataType::Numeric, "s"),
        Err(HubError::Duplicate)
    ));
    assert!(matches!(
        hub.create_input("/counter/value", DataType::Numeric, "count"),
        Err(HubError::Duplicate)
    ));
}

#[test]
fn route_with_override_delivers_substituted_value() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Boolean, "").unwrap();
    hub.create_obs("o").unwrap();
    hub.set_source("/obs/o", Some("/in")).unwrap();
    hub.set_boolean_override("/obs/o", true).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    hub.add_boolean_push_handler("/obs/o", move |_, value| {
        sink.borrow_mut().push(value);
    })
    .unwrap();

    hub.push_boolean("/in", 2.0, false).unwrap();
    hub.run_until_idle();

    assert_eq!(*seen.borrow(), vec![true]);
    assert!(hub.is_overridden("/obs/o").unwrap());
    // The substituted sample keeps the pushed timestamp.
    assert_eq!(hub.get_timestamp("/obs/o").unwrap(), 2.0);
}

#[test]
fn routing_cycles_are_rejected() {
    let hub = DataHub::new();
    hub.create_obs("a").unwrap();
    hub.create_obs("b").unwrap();
    hub.create_obs("c").unwrap();

    hub.set_source("/obs/b", Some("/obs/a")).unwrap();
    hub.set_source("/obs/c", Some("/obs/b")).unwrap();
    assert!(matches!(
        hub.set_source("/obs/a", Some("/obs/c")),
        Err(HubError::Duplicate)
    ));

    // The graph is unchanged by the failed attempt.
    assert_eq!(hub.get_source("/obs/a").unwrap(), None);
    assert_eq!(hub.get_source("/obs/b").unwrap(), Some("/obs/a".to_string()));
    assert_eq!(hub.get_source("/obs/c").unwrap(), Some("/obs/b".to_string()));
}

#[test]
fn chained_routes_propagate_within_one_push() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").unwrap();
    hub.create_obs("first").unwrap();
    hub.create_obs("second").unwrap();
    hub.set_source("/obs/first", Some("/in")).unwrap();
    hub.set_source("/obs/second", Some("/obs/first")).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    hub.add_numeric_push_handler("/obs/second", move |_, value| {
        sink.borrow_mut().push(value);
    })
    .unwrap();

    hub.push_numeric("/in", 1.0, 7.0).unwrap();
    hub.run_until_idle();
    assert_eq!(*seen.borrow(), vec![7.0]);
}

#[test]
fn observation_filters_apply_in_order() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").unwrap();
    hub.create_obs("filtered").unwrap();
    hub.set_source("/obs/filtered", Some("/in")).unwrap();
    hub.set_low_limit("filtered", 0.0).unwrap();
    hub.set_high_limit("filtered", 100.0).unwrap();
    hub.set_change_by("filtered", 2.0).unwrap();
    hub.set_min_period("filtered", 5.0).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    hub.add_numeric_push_handler("/obs/filtered", move |ts, value| {
        sink.borrow_mut().push((ts, value));
    })
    .unwrap();

    hub.push_numeric("/in", 10.0, 50.0).unwrap(); // accepted
    hub.push_numeric("/in", 11.0, 200.0).unwrap(); // over the high limit
    hub.push_numeric("/in", 16.0, 51.0).unwrap(); // change below change_by
    hub.push_numeric("/in", 14.0, 60.0).unwrap(); // throttled by min period
    hub.push_numeric("/in", 30.0, 60.0).unwrap(); // accepted
    hub.run_until_idle();

    assert_eq!(*seen.borrow(), vec![(10.0, 50.0), (30.0, 60.0)]);
}

#[test]
fn deleting_configured_resource_leaves_placeholder() {
    let hub = DataHub::new();
    hub.create_output("/app/actuator/dummy/output", DataType::String, "").unwrap();
    hub.set_string_default("/app/actuator/dummy/output", "A Default Value").unwrap();

    hub.delete_resource("/app/actuator/dummy/output").unwrap();
    hub.run_until_idle();

    assert_eq!(
        hub.get_entry_type("/app/actuator/dummy/output").unwrap(),
        EntryType::Placeholder
    );
    assert!(hub.has_admin_settings("/app/actuator/dummy/output").unwrap());
    assert!(hub.has_default("/app/actuator/dummy/output").unwrap());

    // Recreating the output takes the settings (and the default) back over.
    hub.create_output("/app/actuator/dummy/output", DataType::String, "").unwrap();
    assert_eq!(
        hub.get_entry_type("/app/actuator/dummy/output").unwrap(),
        EntryType::Output
    );
    let (data_type, value) = hub
        .get_current_value("/app/actuator/dummy/output")
        .unwrap()
        .expect("default promoted to current");
    assert_eq!(data_type, DataType::String);
    assert_eq!(value.as_text(), Some("A Default Value"));
}

#[test]
fn admin_settings_may_precede_the_resource() {
    let hub = DataHub::new();
    hub.set_numeric_default("/app/later/input", 9.0).unwrap();
    assert_eq!(
        hub.get_entry_type("/app/later/input").unwrap(),
        EntryType::Placeholder
    );

    hub.create_input("/app/later/input", DataType::Numeric, "").unwrap();
    assert_eq!(
        hub.get_entry_type("/app/later/input").unwrap(),
        EntryType::Input
    );
    let (_, value) = hub
        .get_current_value("/app/later/input")
        .unwrap()
        .expect("default promoted on takeover");
    assert_eq!(value.as_num(), Some(9.0));
}

#[test]
fn tree_change_handlers_observe_lifecycle() {
    let hub = DataHub::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let handle = hub.add_tree_change_handler(move |path, kind, op| {
        sink.borrow_mut().push((path.to_string(), kind, op));
    });

    hub.create_input("/dummy/input", DataType::Numeric, "").unwrap();
    hub.delete_resource("/dummy/input").unwrap();
    hub.run_until_idle();

    assert_eq!(
        *seen.borrow(),
        vec![
            ("/dummy/input".to_string(), EntryType::Input, TreeChangeOp::Added),
            ("/dummy/input".to_string(), EntryType::Input, TreeChangeOp::Removed),
        ]
    );

    hub.remove_tree_change_handler(handle);
    hub.create_output("/dummy/output", DataType::String, "").unwrap();
    hub.run_until_idle();
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn handler_registered_after_push_misses_it() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").unwrap();
    hub.push_numeric("/in", 1.0, 1.0).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    hub.add_numeric_push_handler("/in", move |_, value| {
        sink.borrow_mut().push(value);
    })
    .unwrap();

    hub.push_numeric("/in", 2.0, 2.0).unwrap();
    hub.run_until_idle();
    assert_eq!(*seen.borrow(), vec![2.0]);
}

#[test]
fn removed_handler_stops_receiving() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let handle = hub
        .add_numeric_push_handler("/in", move |_, value| {
            sink.borrow_mut().push(value);
        })
        .unwrap();

    hub.push_numeric("/in", 1.0, 1.0).unwrap();
    hub.remove_push_handler(handle);
    hub.push_numeric("/in", 2.0, 2.0).unwrap();
    hub.run_until_idle();
    assert_eq!(*seen.borrow(), vec![1.0]);
}

#[test]
fn structural_mutations_are_busy_during_snapshot() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").unwrap();

    let reader = hub.take_snapshot(FORMAT_JSON, 0, "/", BEGINNING_OF_TIME, |_| {});
    assert!(reader.is_some());

    assert!(matches!(
        hub.create_input("/late", DataType::Numeric, ""),
        Err(HubError::Busy)
    ));
    assert!(matches!(
        hub.delete_resource("/in"),
        Err(HubError::Busy)
    ));
    assert!(matches!(
        hub.set_numeric_default("/in", 1.0),
        Err(HubError::Busy)
    ));
}

#[test]
fn pushes_during_snapshot_are_held_until_the_lock_lifts() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Numeric, "").unwrap();
    hub.push_numeric("/in", 1.0, 1.0).unwrap();

    let mut reader = hub
        .take_snapshot(FORMAT_JSON, 0, "/", BEGINNING_OF_TIME, |result| {
            assert!(result.is_ok());
        })
        .expect("snapshot stream");

    // Held: the tree is paused for the scan.
    hub.push_numeric("/in", 5.0, 5.0).unwrap();
    assert_eq!(hub.get_timestamp("/in").unwrap(), 1.0);

    let mut buf = [0u8; 256];
    loop {
        hub.run_until_idle();
        match reader.read(&mut buf) {
            datahub::ReadOutcome::Data(_) => {}
            datahub::ReadOutcome::WouldBlock => continue,
            datahub::ReadOutcome::Eof => break,
        }
    }
    hub.run_until_idle();

    // The held push landed after the snapshot finished.
    assert_eq!(hub.get_timestamp("/in").unwrap(), 5.0);
}

#[test]
fn json_extraction_follows_specifiers() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Json, "").unwrap();
    hub.push_json("/in", 3.0, "{\"pos\":{\"lat\":48.1,\"lon\":11.5},\"ok\":true}")
        .unwrap();
    hub.run_until_idle();

    let (_, sample) = hub.get_current_value("/in").unwrap().unwrap();
    let pools = hub.pools();
    let (data_type, lat) = extract_json(&sample, "pos.lat", &pools).unwrap();
    assert_eq!(data_type, DataType::Numeric);
    assert_eq!(lat.as_num(), Some(48.1));
    assert_eq!(lat.timestamp(), 3.0);
}

#[test]
fn invalid_json_push_is_a_format_error() {
    let hub = DataHub::new();
    hub.create_input("/in", DataType::Json, "").unwrap();
    assert!(matches!(
        hub.push_json("/in", 1.0, "{not json"),
        Err(HubError::FormatError(_))
    ));
}
