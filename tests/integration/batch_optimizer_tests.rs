// Batch auto-scheduling over realistic snapshots

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc, Weekday};
use therapy_scheduler_lib::commands::schedule::{
    optimize_schedule, optimize_schedule_cancellable, OptimizeScheduleInput,
};
use therapy_scheduler_lib::commands::EngineState;
use therapy_scheduler_lib::config::EngineConfig;
use therapy_scheduler_lib::models::availability::{TimeRange, WeeklyAvailability};
use therapy_scheduler_lib::models::plan::{AssignmentPlan, ScheduleConstraints};
use therapy_scheduler_lib::models::scheduling::{Client, ExistingSession, SessionStatus, Therapist};
use therapy_scheduler_lib::services::compatibility::CompatibilityScorer;
use therapy_scheduler_lib::services::conflict_detector::{ConflictDetector, ProposedSession};
use therapy_scheduler_lib::services::schedule_optimizer::{
    BatchProgress, CancellationFlag, ScheduleOptimizer,
};
use therapy_scheduler_lib::services::schedule_utils::intervals_overlap;
use therapy_scheduler_lib::services::score_cache::ScoreCache;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, minute, 0)
        .single()
        .expect("valid datetime")
}

fn range(start: &str, end: &str) -> TimeRange {
    TimeRange::parse(start, end).expect("range")
}

fn therapists() -> Vec<Therapist> {
    vec![
        Therapist {
            id: "t-aba-1".into(),
            name: "Dana Ortiz".into(),
            availability: WeeklyAvailability::weekdays(range("09:00", "17:00")),
            service_types: vec!["ABA".into()],
            specialties: vec!["autism".into()],
            max_clients: 4,
            current_clients: 1,
            min_weekly_hours: 0.0,
            max_weekly_hours: 0.0,
        },
        Therapist {
            id: "t-aba-2".into(),
            name: "Sam Patel".into(),
            availability: WeeklyAvailability::default()
                .with_day(Weekday::Tue, range("12:00", "18:00"))
                .with_day(Weekday::Thu, range("12:00", "18:00")),
            service_types: vec!["aba".into(), "speech".into()],
            specialties: vec![],
            max_clients: 6,
            current_clients: 0,
            min_weekly_hours: 4.0,
            max_weekly_hours: 0.0,
        },
        Therapist {
            id: "t-ot".into(),
            name: "Jo Kim".into(),
            availability: WeeklyAvailability::weekdays(range("08:00", "12:00")),
            service_types: vec!["OT".into()],
            specialties: vec!["sensory".into()],
            max_clients: 2,
            current_clients: 0,
            min_weekly_hours: 0.0,
            max_weekly_hours: 2.0,
        },
    ]
}

fn clients() -> Vec<Client> {
    let mut clients: Vec<Client> = (0..8)
        .map(|idx| Client {
            id: format!("c-{idx:02}"),
            name: format!("Client {idx}"),
            availability: WeeklyAvailability::weekdays(range("10:00", "15:00")),
            service_preferences: vec![if idx % 3 == 0 { "ot".into() } else { "aba".into() }],
            date_of_birth: None,
            authorized_units: 8 + idx * 4,
        })
        .collect();
    clients.push(Client {
        id: "c-none".into(),
        name: "No Overlap".into(),
        availability: WeeklyAvailability::default().with_day(Weekday::Sat, range("09:00", "12:00")),
        service_preferences: vec!["aba".into()],
        date_of_birth: None,
        authorized_units: 40,
    });
    clients
}

fn existing() -> Vec<ExistingSession> {
    vec![
        ExistingSession {
            id: "s-1".into(),
            therapist_id: "t-aba-1".into(),
            client_id: "c-legacy".into(),
            start_time: at(2, 10, 0),
            end_time: at(2, 11, 0),
            status: SessionStatus::Confirmed,
        },
        ExistingSession {
            id: "s-2".into(),
            therapist_id: "t-ot".into(),
            client_id: "c-03".into(),
            start_time: at(2, 10, 0),
            end_time: at(2, 11, 30),
            status: SessionStatus::Scheduled,
        },
    ]
}

fn input() -> OptimizeScheduleInput {
    OptimizeScheduleInput {
        clients: clients(),
        therapists: therapists(),
        existing_sessions: existing(),
        constraints: ScheduleConstraints::starting_at(at(2, 0, 0)),
    }
}

fn every_client_accounted_for(plan: &AssignmentPlan, clients: &[Client]) {
    let mut seen = HashSet::new();
    for id in plan
        .assignments
        .iter()
        .map(|a| &a.client_id)
        .chain(plan.unassigned.iter().map(|u| &u.client_id))
        .chain(plan.unprocessed_client_ids.iter())
    {
        assert!(seen.insert(id.clone()), "client {id} appears twice");
    }
    assert_eq!(seen.len(), clients.len());
}

#[tokio::test]
async fn assignments_are_conflict_free_against_snapshot_and_each_other() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let plan = optimize_schedule(&state, input()).await.expect("plan");

    assert!(!plan.cancelled);
    every_client_accounted_for(&plan, &clients());
    assert!(plan.assignments.len() >= 5);

    let detector = ConflictDetector::new(state.config().timezone);
    let therapists = therapists();
    let clients = clients();
    let mut occupied = existing();

    for assignment in &plan.assignments {
        let therapist = therapists
            .iter()
            .find(|t| t.id == assignment.therapist_id)
            .expect("known therapist");
        let client = clients
            .iter()
            .find(|c| c.id == assignment.client_id)
            .expect("known client");

        let proposal = ProposedSession::new(
            assignment.start_time,
            assignment.end_time,
            therapist.id.clone(),
            client.id.clone(),
        );
        let conflicts = detector
            .detect(&proposal, &occupied, therapist, client)
            .expect("detect");
        assert!(conflicts.is_empty(), "{} has conflicts: {conflicts:?}", client.id);
        assert!(assignment.score <= assignment.compatibility + 1e-12);

        occupied.push(ExistingSession {
            id: format!("planned-{}", client.id),
            therapist_id: therapist.id.clone(),
            client_id: client.id.clone(),
            start_time: assignment.start_time,
            end_time: assignment.end_time,
            status: SessionStatus::Scheduled,
        });
    }

    for (idx, a) in plan.assignments.iter().enumerate() {
        for b in &plan.assignments[idx + 1..] {
            if a.therapist_id == b.therapist_id {
                assert!(!intervals_overlap(a.start_time, a.end_time, b.start_time, b.end_time));
            }
        }
    }
}

#[tokio::test]
async fn capacity_and_weekly_caps_are_respected() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let plan = optimize_schedule(&state, input()).await.expect("plan");

    for therapist in therapists() {
        let assigned: Vec<_> = plan
            .assignments
            .iter()
            .filter(|a| a.therapist_id == therapist.id)
            .collect();
        let clients: HashSet<_> = assigned.iter().map(|a| a.client_id.as_str()).collect();
        let carried = existing()
            .iter()
            .filter(|s| s.therapist_id == therapist.id)
            .map(|s| s.client_id.clone())
            .filter(|id| !clients.contains(id.as_str()))
            .count() as u32;
        assert!(therapist.current_clients + carried + clients.len() as u32 <= therapist.max_clients);
    }

    // t-ot is capped at two weekly hours and already carries 90 minutes.
    let ot_sessions = plan.assignments.iter().filter(|a| a.therapist_id == "t-ot").count();
    assert_eq!(ot_sessions, 0);
    let ot_client = plan.unassigned_for("c-00").expect("ot client unassigned");
    assert!(ot_client
        .reasons
        .iter()
        .any(|reason| reason.starts_with("t-ot: weekly hour cap")));

    let stranded = plan.unassigned_for("c-none").expect("no shared availability");
    assert!(stranded
        .reasons
        .iter()
        .any(|reason| reason.contains("no shared weekly availability")));
}

#[tokio::test]
async fn identical_snapshots_produce_identical_plans() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let first = optimize_schedule(&state, input()).await.expect("plan");
    let second = optimize_schedule(&state, input()).await.expect("plan");

    assert_eq!(first.assignments, second.assignments);
    assert_eq!(first.unassigned, second.unassigned);
    assert_ne!(first.id, second.id);
    assert!(second.stats.cache_hits >= second.stats.pairs_scored as u64);
    assert_eq!(second.stats.cache_misses, 0);
}

#[tokio::test]
async fn cancelled_batch_reports_unprocessed_clients() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let plan = optimize_schedule_cancellable(&state, input(), cancel)
        .await
        .expect("partial plan");

    assert!(plan.cancelled);
    every_client_accounted_for(&plan, &clients());
    assert_eq!(plan.unprocessed_client_ids.len(), clients().len());
    assert!(plan.warnings.is_empty());
}

#[test]
fn cancelling_mid_run_keeps_the_partial_plan() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let cancel = CancellationFlag::new();
    let input = input();
    let mut progress: Vec<BatchProgress> = Vec::new();

    let plan = state
        .optimizer()
        .optimize_batch_with_progress(
            &input.clients,
            &input.therapists,
            &input.existing_sessions,
            &input.constraints,
            &cancel,
            |step| {
                if step.assigned {
                    cancel.cancel();
                }
                progress.push(step.clone());
            },
        )
        .expect("partial plan");

    assert!(plan.cancelled);
    assert_eq!(plan.assignments.len(), 1);
    every_client_accounted_for(&plan, &clients());

    let last = progress.last().expect("progress reported");
    assert!(last.assigned);
    assert_eq!(last.client_id, plan.assignments[0].client_id);
    assert_eq!(last.total, clients().len());
    assert_eq!(last.processed, progress.len());
    assert_eq!(plan.unprocessed_client_ids.len(), clients().len() - last.processed);
    assert!(!plan.unprocessed_client_ids.contains(&plan.assignments[0].client_id));
}

#[test]
fn practice_timezone_drives_slot_placement() {
    let config = EngineConfig {
        timezone: chrono_tz::America::Chicago,
        ..EngineConfig::default()
    };
    let optimizer = ScheduleOptimizer::new(
        &config,
        CompatibilityScorer::new(Arc::new(ScoreCache::new(256)), config.scoring_weights),
    );
    let therapist = therapists().remove(0);
    let client = clients().remove(1);

    // Monday 00:00 in Chicago (CDT) is 05:00 UTC.
    let plan = optimizer
        .optimize_batch(
            &[client],
            &[therapist],
            &[],
            &ScheduleConstraints::starting_at(at(2, 5, 0)),
            &CancellationFlag::new(),
        )
        .expect("plan");

    assert_eq!(plan.assignments.len(), 1);
    assert_eq!(plan.assignments[0].start_time, at(2, 15, 0));
}

#[test]
fn therapists_under_minimum_hours_are_flagged() {
    let config = EngineConfig::default();
    let optimizer = ScheduleOptimizer::new(
        &config,
        CompatibilityScorer::new(Arc::new(ScoreCache::new(256)), config.scoring_weights),
    );
    let plan = optimizer
        .optimize_batch(
            &[],
            &therapists(),
            &existing(),
            &ScheduleConstraints::starting_at(at(2, 0, 0)),
            &CancellationFlag::new(),
        )
        .expect("plan");

    assert_eq!(plan.warnings.len(), 1);
    assert!(plan.warnings[0].contains("t-aba-2"));
}
