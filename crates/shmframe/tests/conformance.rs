//! Conformance scenarios against the backend compiled for this target.

use shmframe::PlatformBackend;

#[test]
fn cross_mapping_visibility() {
    shmframe_testkit::run_cross_mapping_visibility::<PlatformBackend>();
}

#[test]
fn handoff_law() {
    shmframe_testkit::run_handoff_law::<PlatformBackend>();
}

#[test]
fn backpressure_law() {
    shmframe_testkit::run_backpressure_law::<PlatformBackend>();
}

#[test]
fn resize_law() {
    shmframe_testkit::run_resize_law::<PlatformBackend>();
}

#[test]
fn concrete_scenario() {
    shmframe_testkit::run_concrete_scenario::<PlatformBackend>();
}

#[test]
fn open_missing() {
    shmframe_testkit::run_open_missing::<PlatformBackend>();
}

#[test]
fn idempotent_teardown() {
    shmframe_testkit::run_idempotent_teardown::<PlatformBackend>();
}

#[test]
fn concurrent_handoff() {
    shmframe_testkit::run_concurrent_handoff::<PlatformBackend>();
}
