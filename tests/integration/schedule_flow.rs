// Detect -> suggest -> re-check flow across the engine state

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc, Weekday};
use therapy_scheduler_lib::commands::schedule::{
    detect_scheduling_conflicts, suggest_alternative_times, DetectConflictsInput,
    SuggestAlternativesInput,
};
use therapy_scheduler_lib::commands::EngineState;
use therapy_scheduler_lib::config::{EngineConfig, ScoringWeights};
use therapy_scheduler_lib::error::AppResult;
use therapy_scheduler_lib::models::availability::{TimeRange, WeeklyAvailability};
use therapy_scheduler_lib::models::scheduling::{
    Client, ConflictType, ExistingSession, SessionStatus, Therapist,
};
use therapy_scheduler_lib::services::compatibility::{
    CompatibilityScorer, PairScorer, WeightedPairScorer,
};
use therapy_scheduler_lib::services::conflict_detector::ProposedSession;
use therapy_scheduler_lib::services::score_cache::ScoreCache;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, minute, 0)
        .single()
        .expect("valid datetime")
}

fn therapist() -> Therapist {
    let range = TimeRange::parse("09:00", "17:00").expect("range");
    Therapist {
        id: "t-1".into(),
        name: "Dana Ortiz".into(),
        availability: WeeklyAvailability::weekdays(range).without_day(Weekday::Fri),
        service_types: vec!["ABA".into(), "Parent Training".into()],
        specialties: vec!["Autism".into()],
        max_clients: 8,
        current_clients: 4,
        min_weekly_hours: 0.0,
        max_weekly_hours: 0.0,
    }
}

fn client() -> Client {
    Client {
        id: "c-1".into(),
        name: "Riley Chen".into(),
        availability: WeeklyAvailability::default()
            .with_day(Weekday::Mon, TimeRange::parse("10:00", "16:00").expect("range"))
            .with_day(Weekday::Wed, TimeRange::parse("13:00", "15:00").expect("range")),
        service_preferences: vec!["aba".into(), "autism".into()],
        date_of_birth: None,
        authorized_units: 40,
    }
}

fn sessions() -> Vec<ExistingSession> {
    vec![
        ExistingSession {
            id: "s-100".into(),
            therapist_id: "t-1".into(),
            client_id: "c-2".into(),
            start_time: at(2, 13, 0),
            end_time: at(2, 14, 0),
            status: SessionStatus::Confirmed,
        },
        ExistingSession {
            id: "s-101".into(),
            therapist_id: "t-7".into(),
            client_id: "c-1".into(),
            start_time: at(2, 14, 0),
            end_time: at(2, 15, 0),
            status: SessionStatus::Scheduled,
        },
        ExistingSession {
            id: "s-102".into(),
            therapist_id: "t-1".into(),
            client_id: "c-3".into(),
            start_time: at(2, 12, 0),
            end_time: at(2, 13, 0),
            status: SessionStatus::Cancelled,
        },
    ]
}

#[tokio::test]
async fn rejected_request_gets_conflict_free_alternatives() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let request = ProposedSession::new(at(2, 13, 30), at(2, 14, 30), "t-1", "c-1");

    let conflicts = detect_scheduling_conflicts(
        &state,
        DetectConflictsInput {
            session: request.clone(),
            existing_sessions: sessions(),
            therapist: therapist(),
            client: client(),
        },
    )
    .await
    .expect("conflicts");
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::SessionOverlap);
    assert!(conflicts[0].message.contains("and 1 other session"));

    let alternatives = suggest_alternative_times(
        &state,
        SuggestAlternativesInput {
            session: request.clone(),
            existing_sessions: sessions(),
            therapist: therapist(),
            client: client(),
            conflicts: conflicts.clone(),
        },
    )
    .await
    .expect("alternatives");

    assert!(!alternatives.is_empty());
    assert!(alternatives.len() <= state.config().max_alternatives);
    assert!(alternatives.windows(2).all(|w| w[0].score >= w[1].score));

    for alternative in &alternatives {
        assert!(alternative.reason.starts_with("Resolves session overlap"));
        assert!((0.0..=1.0).contains(&alternative.score));
        let recheck = state
            .detector()
            .detect(
                &ProposedSession::new(alternative.start_time, alternative.end_time, "t-1", "c-1"),
                &sessions(),
                &therapist(),
                &client(),
            )
            .expect("recheck");
        assert!(recheck.is_empty(), "alternative {:?} must be conflict-free", alternative.start_time);
    }

    // The cancelled 12:00 session does not block its slot.
    let noon = alternatives.iter().find(|a| a.start_time == at(2, 12, 0));
    assert!(noon.is_some() || alternatives.len() == state.config().max_alternatives);
}

#[tokio::test]
async fn nearby_days_are_searched_when_the_day_is_full() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let busy_monday: Vec<ExistingSession> = (10..16)
        .map(|hour| ExistingSession {
            id: format!("s-{hour}"),
            therapist_id: "t-1".into(),
            client_id: format!("c-{hour}"),
            start_time: at(2, hour, 0),
            end_time: at(2, hour + 1, 0),
            status: SessionStatus::Scheduled,
        })
        .collect();

    let request = ProposedSession::new(at(2, 11, 0), at(2, 12, 0), "t-1", "c-1");
    let conflicts = state
        .detector()
        .detect(&request, &busy_monday, &therapist(), &client())
        .expect("conflicts");

    let alternatives = state
        .suggester()
        .suggest(&request, &busy_monday, &therapist(), &client(), &conflicts)
        .await
        .expect("alternatives");

    // Only Wednesday 13:00-15:00 remains: 13:00, 13:30 and 14:00 starts.
    let starts: Vec<_> = alternatives.iter().map(|a| a.start_time).collect();
    assert_eq!(starts, vec![at(4, 13, 0), at(4, 13, 30), at(4, 14, 0)]);
    assert!(alternatives[0].reason.ends_with("2 days later at 13:00"));
}

struct Counting {
    calls: AtomicUsize,
}

impl PairScorer for Counting {
    fn compute(&self, therapist: &Therapist, client: &Client) -> AppResult<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        WeightedPairScorer::new(ScoringWeights::default()).compute(therapist, client)
    }
}

#[test]
fn scores_are_memoized_until_the_cache_is_cleared() {
    let counting = Arc::new(Counting { calls: AtomicUsize::new(0) });
    let cache = Arc::new(ScoreCache::new(128));
    let scorer = CompatibilityScorer::with_pair_scorer(Arc::clone(&cache), counting.clone());

    let first = scorer.score(&therapist(), &client()).expect("score");
    let second = scorer.score(&therapist(), &client()).expect("score");
    assert_eq!(first.to_bits(), second.to_bits());
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    assert!(first > 0.0 && first <= 1.0);

    assert_eq!(cache.clear(), 1);
    scorer.score(&therapist(), &client()).expect("score");
    assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_suggestions_share_one_cache() {
    let state = EngineState::new(EngineConfig::default()).expect("engine state");
    let request = ProposedSession::new(at(2, 13, 30), at(2, 14, 30), "t-1", "c-1");
    let conflicts = state
        .detector()
        .detect(&request, &sessions(), &therapist(), &client())
        .expect("conflicts");

    let runs = (0..4).map(|_| {
        let state = state.clone();
        let request = request.clone();
        let conflicts = conflicts.clone();
        async move {
            let suggester = state.suggester();
            let result = suggester
                .suggest(&request, &sessions(), &therapist(), &client(), &conflicts)
                .await;
            result
        }
    });
    let results = futures::future::join_all(runs).await;

    let first = results[0].as_ref().expect("alternatives");
    for result in &results {
        assert_eq!(result.as_ref().expect("alternatives"), first);
    }
    assert_eq!(state.cache().len(), 1);
}
