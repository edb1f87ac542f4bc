// Error handling and edge case tests

use chrono::{DateTime, TimeZone, Utc, Weekday};
use serde_json::json;
use therapy_scheduler_lib::config::EngineConfig;
use therapy_scheduler_lib::error::AppError;
use therapy_scheduler_lib::models::availability::{TimeRange, WeeklyAvailability};
use therapy_scheduler_lib::models::plan::ScheduleConstraints;
use therapy_scheduler_lib::models::scheduling::{Client, ExistingSession, SessionStatus, Therapist};
use therapy_scheduler_lib::services::conflict_detector::ProposedSession;
use therapy_scheduler_lib::services::schedule_optimizer::CancellationFlag;
use therapy_scheduler_lib::services::schedule_utils;
use therapy_scheduler_lib::EngineState;

fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0)
        .single()
        .expect("valid datetime")
}

fn therapist() -> Therapist {
    Therapist {
        id: "t-1".into(),
        name: "Dana Ortiz".into(),
        availability: WeeklyAvailability::default()
            .with_day(Weekday::Mon, TimeRange::parse("09:00", "17:00").expect("range")),
        service_types: vec!["aba".into()],
        specialties: vec![],
        max_clients: 4,
        current_clients: 0,
        min_weekly_hours: 0.0,
        max_weekly_hours: 0.0,
    }
}

fn client() -> Client {
    Client {
        id: "c-1".into(),
        name: "Riley Chen".into(),
        availability: WeeklyAvailability::default()
            .with_day(Weekday::Mon, TimeRange::parse("10:00", "16:00").expect("range")),
        service_preferences: vec!["aba".into()],
        date_of_birth: None,
        authorized_units: 40,
    }
}

fn state() -> EngineState {
    EngineState::new(EngineConfig::default()).expect("engine state")
}

#[test]
fn test_zero_length_and_inverted_intervals_are_rejected() {
    let detector = state().detector();
    for (start, end) in [(monday(11, 0), monday(11, 0)), (monday(12, 0), monday(11, 0))] {
        let proposal = ProposedSession::new(start, end, "t-1", "c-1");
        let err = detector
            .detect(&proposal, &[], &therapist(), &client())
            .expect_err("invalid interval");
        assert!(matches!(err, AppError::Validation { details: Some(_), .. }));
    }
}

#[test]
fn test_missing_ids_are_rejected() {
    let detector = state().detector();
    let mut anonymous = therapist();
    anonymous.id = String::new();
    let proposal = ProposedSession::new(monday(11, 0), monday(12, 0), "", "c-1");
    let err = detector
        .detect(&proposal, &[], &anonymous, &client())
        .expect_err("missing therapist id");
    assert!(err.to_string().contains("therapist id is required"));
}

#[tokio::test]
async fn test_suggester_validates_before_searching() {
    let proposal = ProposedSession::new(monday(11, 0), monday(12, 0), "t-1", "c-9");
    let err = state()
        .suggester()
        .suggest(&proposal, &[], &therapist(), &client(), &[])
        .await
        .expect_err("mismatched client");
    assert!(err.is_validation());
}

#[test]
fn test_malformed_timestamps_and_times_fail_validation() {
    assert!(schedule_utils::parse_datetime("2025-06-02 11:00").is_err());
    assert!(schedule_utils::parse_datetime("2025-06-02T11:00:00+02:00").is_ok());
    assert!(schedule_utils::parse_time_of_day("25:00").is_err());
    assert!(TimeRange::parse("17:00", "09:00").is_err());

    let session: Result<ExistingSession, _> = serde_json::from_value(json!({
        "id": "s-1",
        "therapistId": "t-1",
        "clientId": "c-1",
        "startTime": "not a time",
        "endTime": "2025-06-02T12:00:00Z"
    }));
    assert!(session.is_err());
}

#[test]
fn test_inverted_availability_window_degrades_to_unavailable() {
    let client: Client = serde_json::from_value(json!({
        "id": "c-1",
        "name": "Riley Chen",
        "availability": {"monday": {"start": "16:00", "end": "10:00"}},
        "servicePreferences": ["aba"],
        "authorizedUnits": 40
    }))
    .expect("client json");

    let proposal = ProposedSession::new(monday(11, 0), monday(12, 0), "t-1", "c-1");
    let conflicts = state()
        .detector()
        .detect(&proposal, &[], &therapist(), &client)
        .expect("detect");
    assert_eq!(conflicts.len(), 1);
}

#[test]
fn test_batch_rejects_bad_snapshots() {
    let optimizer = state().optimizer();
    let constraints = ScheduleConstraints::starting_at(monday(0, 0));
    let cancel = CancellationFlag::new();

    let err = optimizer
        .optimize_batch(&[client()], &[therapist(), therapist()], &[], &constraints, &cancel)
        .expect_err("duplicate therapist");
    assert!(err.to_string().contains("duplicate therapist id"));

    let broken = ExistingSession {
        id: "s-bad".into(),
        therapist_id: "t-1".into(),
        client_id: "c-1".into(),
        start_time: monday(12, 0),
        end_time: monday(11, 0),
        status: SessionStatus::Scheduled,
    };
    let err = optimizer
        .optimize_batch(&[client()], &[therapist()], &[broken], &constraints, &cancel)
        .expect_err("inverted existing session");
    assert!(err.is_validation());

    let mut no_granularity = constraints.clone();
    no_granularity.slot_granularity_minutes = Some(0);
    assert!(optimizer
        .optimize_batch(&[], &[], &[], &no_granularity, &cancel)
        .is_err());
}

#[test]
fn test_empty_batch_is_a_valid_empty_plan() {
    let plan = state()
        .optimizer()
        .optimize_batch(
            &[],
            &[],
            &[],
            &ScheduleConstraints::starting_at(monday(0, 0)),
            &CancellationFlag::new(),
        )
        .expect("empty plan");
    assert!(plan.assignments.is_empty());
    assert!(plan.unassigned.is_empty());
    assert!(!plan.cancelled);
}

#[test]
fn test_client_without_therapists_is_explained() {
    let plan = state()
        .optimizer()
        .optimize_batch(
            &[client()],
            &[],
            &[],
            &ScheduleConstraints::starting_at(monday(0, 0)),
            &CancellationFlag::new(),
        )
        .expect("plan");
    let entry = plan.unassigned_for("c-1").expect("unassigned");
    assert_eq!(entry.reasons, vec!["no therapists available".to_string()]);
}

#[test]
fn test_invalid_env_values_fall_back_to_defaults() {
    let config = EngineConfig::from_lookup(|key| match key {
        "THERAPY_SCHEDULER_SEARCH_DAYS" => Some("-4".into()),
        "THERAPY_SCHEDULER_TIMEZONE" => Some("Mars/Olympus".into()),
        "THERAPY_SCHEDULER_MAX_ALTERNATIVES" => Some("3".into()),
        _ => None,
    });
    assert_eq!(config.search_days, EngineConfig::default().search_days);
    assert_eq!(config.timezone, chrono_tz::Tz::UTC);
    assert_eq!(config.max_alternatives, 3);
}
