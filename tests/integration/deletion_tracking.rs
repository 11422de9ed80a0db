#![allow(missing_docs)]

//! Deletion tracking: retained deletion records, snapshot reporting and
//! flushing.

use std::cell::RefCell;
use std::rc::Rc;

use datahub::{
    DataHub, DataType, HubError, ReadOutcome, Result as HubResult, BEGINNING_OF_TIME,
    FLAG_FLUSH_DELETIONS, FORMAT_JSON,
};

fn run_snapshot(hub: &DataHub, flags: u32, path: &str, since: f64) -> (HubResult<()>, String) {
    let result: Rc<RefCell<Option<HubResult<()>>>> = Rc::new(RefCell::new(None));
    let slot = result.clone();
    let reader = hub.take_snapshot(FORMAT_JSON, flags, path, since, move |status| {
        *slot.borrow_mut() = Some(status);
    });

    let mut doc = Vec::new();
    if let Some(mut reader) = reader {
        let mut buf = [0u8; 256];
        loop {
            hub.run_until_idle();
            match reader.read(&mut buf) {
                ReadOutcome::Data(n) => doc.extend_from_slice(&buf[..n]),
                ReadOutcome::WouldBlock => continue,
                ReadOutcome::Eof => break,
            }
        }
    }
    hub.run_until_idle();
    let status = result.borrow_mut().take().expect("snapshot result");
    (status, String::from_utf8(doc).expect("utf8 snapshot"))
}

#[test]
fn deleted_resources_are_reported_until_flushed() {
    let hub = DataHub::new();
    hub.track_deletions(true);

    hub.create_input("/app/a/keep", DataType::Numeric, "").unwrap();
    hub.create_input("/app/a/tmp", DataType::Numeric, "").unwrap();
    hub.push_numeric("/app/a/keep", 1.0, 1.0).unwrap();
    hub.delete_resource("/app/a/tmp").unwrap();
    hub.run_until_idle();

    // The deleted entry is invisible to live lookups.
    assert!(matches!(
        hub.get_timestamp("/app/a/tmp"),
        Err(HubError::NotFound)
    ));

    let (status, doc) = run_snapshot(&hub, 0, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert!(parsed["upserted"]["app"]["a"]["keep"].is_object());
    assert!(parsed["upserted"]["app"]["a"].get("tmp").is_none());
    assert!(parsed["deleted"]["app"]["a"]["tmp"].is_object());

    // A flushing snapshot reports the deletion one final time.
    let (status, doc) = run_snapshot(&hub, FLAG_FLUSH_DELETIONS, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert!(parsed["deleted"]["app"]["a"]["tmp"].is_object());

    // After the flush the record is gone for good.
    let (status, doc) = run_snapshot(&hub, 0, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert!(parsed["deleted"]["app"]["a"].get("tmp").is_none());
}

#[test]
fn untracked_deletions_leave_no_record() {
    let hub = DataHub::new();
    hub.create_input("/app/tmp", DataType::Numeric, "").unwrap();
    hub.delete_resource("/app/tmp").unwrap();
    hub.run_until_idle();

    let (status, doc) = run_snapshot(&hub, 0, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert!(parsed["deleted"]["app"].get("tmp").is_none());
}

#[test]
fn disabling_tracking_flushes_records() {
    let hub = DataHub::new();
    hub.track_deletions(true);
    hub.create_input("/app/tmp", DataType::Numeric, "").unwrap();
    hub.delete_resource("/app/tmp").unwrap();
    hub.run_until_idle();

    hub.track_deletions(false);
    hub.run_until_idle();

    let (status, doc) = run_snapshot(&hub, 0, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert!(parsed["deleted"]["app"].get("tmp").is_none());

    // Recreating the path after the flush works normally.
    hub.create_input("/app/tmp", DataType::Numeric, "").unwrap();
    hub.push_numeric("/app/tmp", 1.0, 1.0).unwrap();
    assert_eq!(hub.get_timestamp("/app/tmp").unwrap(), 1.0);
}

#[test]
fn recreation_coexists_with_a_deletion_record() {
    let hub = DataHub::new();
    hub.track_deletions(true);
    hub.create_input("/app/x", DataType::Numeric, "").unwrap();
    hub.delete_resource("/app/x").unwrap();
    // A new live entry under the same name, alongside the record.
    hub.create_input("/app/x", DataType::Numeric, "").unwrap();
    hub.push_numeric("/app/x", 2.0, 5.0).unwrap();
    hub.run_until_idle();

    assert_eq!(hub.get_timestamp("/app/x").unwrap(), 2.0);

    let (status, doc) = run_snapshot(&hub, 0, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert_eq!(parsed["upserted"]["app"]["x"]["value"], 5.0);
    assert!(parsed["deleted"]["app"]["x"].is_object());

    let (status, _) = run_snapshot(&hub, FLAG_FLUSH_DELETIONS, "/", BEGINNING_OF_TIME);
    status.unwrap();
    // Flushing removed the record but not the live entry.
    assert_eq!(hub.get_timestamp("/app/x").unwrap(), 2.0);
}

#[test]
fn observation_deletion_is_tracked_too() {
    let hub = DataHub::new();
    hub.track_deletions(true);
    hub.create_obs("doomed").unwrap();
    hub.delete_obs("doomed").unwrap();
    hub.run_until_idle();

    let (status, doc) = run_snapshot(&hub, 0, "/", BEGINNING_OF_TIME);
    status.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&doc).unwrap();
    assert!(parsed["deleted"]["obs"]["doomed"].is_object());
}
