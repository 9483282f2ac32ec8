// SPDX-License-Identifier: MIT
// Copyright (c) 2026 The Taskmill Authors

use super::*;

#[test]
fn event_names_and_job_ids() {
    let id = JobId::from_string("job-1");
    let events = [
        Event::WorkspaceReady { id: id.clone(), path: "/w".into(), mode: CowMode::Copy },
        Event::WorkspaceFailed { id: id.clone(), reason: "disk full".into() },
        Event::JobSpawned { id: id.clone(), pid: 7 },
        Event::JobFinished { id: id.clone(), outcome: ExecOutcome::Exited { code: 0 } },
    ];
    let names: Vec<_> = events.iter().map(Event::name).collect();
    assert_eq!(names, ["workspace_ready", "workspace_failed", "job_spawned", "job_finished"]);
    for event in &events {
        assert_eq!(event.job_id(), &id);
    }
}

#[test]
fn outcome_display() {
    assert_eq!(ExecOutcome::Exited { code: 2 }.to_string(), "exited");
    assert_eq!(ExecOutcome::TimedOut.to_string(), "timed_out");
}
