//! Integration tests for device notifications and identity handling

mod common;

use common::builders::{info_frame_with_identity, notify_frame};
use common::fakes::TestMachine;
use common::{test_timeout, wait_until};
use espresso_supervisor::config::ConfigStore;
use espresso_supervisor::machine::NotificationResponse;
use espresso_supervisor::protocol::MachineIdentity;
use std::time::Duration;

const NO_WATCHDOG: Duration = Duration::from_secs(600);

#[test]
fn test_unacknowledged_notifications_merge() {
    let mut harness = TestMachine::new();
    let workers = harness.start(NO_WATCHDOG);

    harness.emulator.push_line(&notify_frame("warning", "Water tank low"));
    harness.emulator.push_line(&notify_frame("warning", "Water tank empty;Refill to continue"));
    assert!(wait_until(test_timeout(), || harness.notifications.queued().len() == 2));

    let queued = harness.notifications.queued();
    assert_eq!(queued[0].id, queued[1].id);
    assert_eq!(queued[1].message, "Water tank empty\nRefill to continue");
    assert_eq!(queued[1].responses, vec![NotificationResponse::Ok]);

    assert!(harness
        .machine
        .acknowledge_notification(queued[1].id, Some(NotificationResponse::Ok)));

    harness.emulator.push_line(&notify_frame("acaia_msg", "Scale connected"));
    assert!(wait_until(test_timeout(), || harness.notifications.queued().len() == 3));

    let scale = harness.notifications.queued().remove(2);
    assert_ne!(scale.id, queued[1].id);
    assert!(scale.responses.is_empty());
    assert!(!scale.acknowledged);
    assert_eq!(harness.machine.snapshot().notification.id, scale.id);

    harness.stop(workers);
}

#[test]
fn test_stale_acknowledgement_is_ignored() {
    let harness = TestMachine::new();
    let current = harness.machine.snapshot().notification;
    assert!(!harness
        .machine
        .acknowledge_notification(current.id + 1000, None));
    assert!(!harness.machine.snapshot().notification.acknowledged);
}

#[test]
fn test_device_identity_is_persisted() {
    let mut harness = TestMachine::new();
    let workers = harness.start(NO_WATCHDOG);

    harness
        .emulator
        .push_line(&info_frame_with_identity("1.2.0-7", "00042"));
    assert!(wait_until(test_timeout(), || harness.config.save_count() == 1));

    let system = harness.config.snapshot().system;
    assert_eq!(system.serial_number, "00042");
    assert_eq!(system.color, "black");
    assert_eq!(system.batch_number, "12");
    assert_eq!(system.build_date, "2024-03-01");
    assert_eq!(harness.emulator.flash_count(), 0);

    harness.stop(workers);
}

#[test]
fn test_set_serial_programs_core() {
    let mut harness = TestMachine::new();
    let workers = harness.start(NO_WATCHDOG);
    assert!(wait_until(test_timeout(), || harness.emulator.written().len() >= 3));
    harness.emulator.clear_written();

    harness
        .machine
        .set_serial(MachineIdentity {
            color: "white".into(),
            serial_number: "NOT_ASSIGNED".into(),
            batch_number: "3".into(),
            build_date: "2024-05-20".into(),
        })
        .unwrap();

    let serial = harness.config.snapshot().system.serial_number;
    assert!(serial.starts_with("999"));
    assert_eq!(serial.len(), 8);

    let written = harness.emulator.written_text();
    assert_eq!(written.len(), 4);
    assert_eq!(written[0], "nvs_request,write,color_key,white\u{3}");
    assert_eq!(
        written[1],
        format!("nvs_request,write,serial_number_key,{serial}\u{3}")
    );

    let queued = harness.notifications.queued();
    assert!(queued[0].message.contains(&format!("Serial number: {serial}")));
    assert_eq!(harness.config.save_count(), 1);

    harness.stop(workers);
}
