//! Command-line surface tests, driving the installed binary.

use assert_cmd::Command;
use predicates::prelude::*;
use taskprof_trace::record::{
    CreateRecord, DeleteRecord, Record, RecordPayload, ScheduleRecord, TaskProperties,
    TaskStatuses,
};
use taskprof_trace::{write_trace_file, FileHeader};

fn sample_trace(dir: &std::path::Path) {
    let records = vec![
        Record::new(
            0,
            0,
            100,
            RecordPayload::Create(CreateRecord {
                uid: 1,
                persistent_uid: 0,
                properties: TaskProperties::EXPLICIT,
                statuses: TaskStatuses::empty(),
                label: "T".into(),
                color: 0,
                parent_uid: 0xFFFF_FFFE,
                omp_priority: 0,
                npredecessors: 0,
            }),
        ),
        Record::new(
            0,
            0,
            110,
            RecordPayload::Schedule(ScheduleRecord {
                uid: 1,
                priority: 0,
                properties: TaskProperties::EXPLICIT,
                statuses: TaskStatuses::STARTED,
                schedule_id: 1,
                hwcounters: [0; 4],
            }),
        ),
        Record::new(
            0,
            0,
            200,
            RecordPayload::Schedule(ScheduleRecord {
                uid: 1,
                priority: 0,
                properties: TaskProperties::EXPLICIT,
                statuses: TaskStatuses::COMPLETED,
                schedule_id: 1,
                hwcounters: [0; 4],
            }),
        ),
        Record::new(
            0,
            0,
            210,
            RecordPayload::Delete(DeleteRecord {
                uid: 1,
                priority: 0,
                properties: TaskProperties::EXPLICIT,
                statuses: TaskStatuses::COMPLETED,
            }),
        ),
    ];
    write_trace_file(
        &dir.join("trace.0.0"),
        &FileHeader {
            version: 1,
            pid: 0,
            tid: 0,
        },
        &records,
    )
    .unwrap();
}

#[test]
fn help_exits_cleanly() {
    Command::cargo_bin("taskprof")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    Command::cargo_bin("taskprof")
        .unwrap()
        .arg("--bogus")
        .assert()
        .code(1);
}

#[test]
fn full_run_emits_the_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("traces");
    std::fs::create_dir(&input).unwrap();
    sample_trace(&input);
    let prefix = dir.path().join("out");

    Command::cargo_bin("taskprof")
        .unwrap()
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&prefix)
        .assert()
        .success();

    assert!(dir.path().join("out-stats.json").exists());
    assert!(dir.path().join("out.json").exists());
    assert!(dir.path().join("out.dot").exists());
}

#[test]
fn missing_input_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("taskprof")
        .unwrap()
        .arg("--input")
        .arg(dir.path().join("nowhere"))
        .arg("--output")
        .arg(dir.path().join("out"))
        .assert()
        .code(1);
}

#[test]
fn inconsistent_trace_exits_with_code_two() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("traces");
    std::fs::create_dir(&input).unwrap();
    // a lone creation: the task becomes ready and is never scheduled
    let records = vec![Record::new(
        0,
        0,
        100,
        RecordPayload::Create(CreateRecord {
            uid: 1,
            persistent_uid: 0,
            properties: TaskProperties::EXPLICIT,
            statuses: TaskStatuses::empty(),
            label: "T".into(),
            color: 0,
            parent_uid: 0xFFFF_FFFE,
            omp_priority: 0,
            npredecessors: 0,
        }),
    )];
    write_trace_file(
        &input.join("trace.0.0"),
        &FileHeader {
            version: 1,
            pid: 0,
            tid: 0,
        },
        &records,
    )
    .unwrap();

    Command::cargo_bin("taskprof")
        .unwrap()
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("out"))
        .assert()
        .code(2);
}
