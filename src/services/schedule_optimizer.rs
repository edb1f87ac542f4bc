use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Datelike, Duration, IsoWeek, Utc};
use chrono_tz::Tz;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use crate::models::plan::{
    Assignment, AssignmentPlan, BatchPhase, PlanStats, ScheduleConstraints, UnassignedClient,
};
use crate::models::scheduling::{Client, ConflictType, ExistingSession, SessionStatus, Therapist};
use crate::services::compatibility::CompatibilityScorer;
use crate::services::conflict_detector::{ConflictDetector, ProposedSession};
use crate::services::schedule_utils;

const MINUTES_PER_DAY: i64 = 1_440;
const SCORE_EPSILON: f64 = 1e-9;

/// Shared stop signal for a running batch. Checked between clients.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Progress of the assigning phase, reported after each client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub client_id: String,
    pub assigned: bool,
    pub processed: usize,
    pub total: usize,
}

/// Sessions placed so far plus per-therapist load and minutes booked per
/// local ISO week.
#[derive(Debug, Clone)]
struct Occupancy {
    sessions: Vec<ExistingSession>,
    caseloads: HashMap<String, HashSet<String>>,
    weekly_minutes: HashMap<(String, IsoWeek), i64>,
    tz: Tz,
}

impl Occupancy {
    fn from_snapshot(existing_sessions: &[ExistingSession], tz: Tz) -> Self {
        let mut occupancy = Self {
            sessions: existing_sessions.to_vec(),
            caseloads: HashMap::new(),
            weekly_minutes: HashMap::new(),
            tz,
        };

        for session in existing_sessions.iter().filter(|s| s.status.blocks_time()) {
            occupancy
                .caseloads
                .entry(session.therapist_id.clone())
                .or_default()
                .insert(session.client_id.clone());
            occupancy.book(&session.therapist_id, session.start_time, session.minutes());
        }
        occupancy
    }

    fn week_of(&self, instant: DateTime<Utc>) -> IsoWeek {
        instant.with_timezone(&self.tz).iso_week()
    }

    fn book(&mut self, therapist_id: &str, start_time: DateTime<Utc>, minutes: i64) {
        let week = self.week_of(start_time);
        *self
            .weekly_minutes
            .entry((therapist_id.to_string(), week))
            .or_default() += minutes;
    }

    fn running_load(&self, therapist: &Therapist) -> u32 {
        let carried = self
            .caseloads
            .get(&therapist.id)
            .map(|clients| clients.len() as u32)
            .unwrap_or(0);
        therapist.current_clients + carried
    }

    fn already_serves(&self, therapist_id: &str, client_id: &str) -> bool {
        self.caseloads
            .get(therapist_id)
            .is_some_and(|clients| clients.contains(client_id))
    }

    fn booked_in_week(&self, therapist_id: &str, week: IsoWeek) -> i64 {
        self.weekly_minutes
            .get(&(therapist_id.to_string(), week))
            .copied()
            .unwrap_or(0)
    }

    fn record(mut self, plan_id: &str, assignment: &Assignment) -> Self {
        self.sessions.push(ExistingSession {
            id: format!("{plan_id}:{}", assignment.client_id),
            therapist_id: assignment.therapist_id.clone(),
            client_id: assignment.client_id.clone(),
            start_time: assignment.start_time,
            end_time: assignment.end_time,
            status: SessionStatus::Scheduled,
        });
        self.caseloads
            .entry(assignment.therapist_id.clone())
            .or_default()
            .insert(assignment.client_id.clone());
        self.book(
            &assignment.therapist_id,
            assignment.start_time,
            (assignment.end_time - assignment.start_time).num_minutes(),
        );
        self
    }
}

/// Accumulator threaded through the assigning fold.
struct FoldState {
    occupancy: Occupancy,
    assignments: Vec<Assignment>,
    unassigned: Vec<UnassignedClient>,
    unprocessed: Vec<String>,
    cancelled: bool,
}

/// Why candidate slots for one therapist were turned down.
#[derive(Debug, Default)]
struct SlotRejections {
    conflicts: Vec<(ConflictType, usize)>,
    over_weekly_cap: usize,
}

impl SlotRejections {
    fn tally(&mut self, kind: ConflictType) {
        match self.conflicts.iter_mut().find(|(seen, _)| *seen == kind) {
            Some((_, count)) => *count += 1,
            None => self.conflicts.push((kind, 1)),
        }
    }

    fn only_weekly_cap(&self) -> bool {
        self.conflicts.is_empty() && self.over_weekly_cap > 0
    }

    fn summary(&self) -> String {
        let mut parts: Vec<String> = self
            .conflicts
            .iter()
            .map(|(kind, count)| format!("{kind} ×{count}"))
            .collect();
        if self.over_weekly_cap > 0 {
            parts.push(format!("weekly hour cap ×{}", self.over_weekly_cap));
        }
        if parts.is_empty() {
            return String::new();
        }
        format!(" ({})", parts.join(", "))
    }
}

enum Placement {
    Assigned(Assignment),
    Unassigned(Vec<String>),
}

struct Candidate<'a> {
    therapist: &'a Therapist,
    start_time: DateTime<Utc>,
    compatibility: f64,
    combined: f64,
    load: u32,
}

/// Resolved batch parameters.
#[derive(Debug, Clone, Copy)]
struct Horizon {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    days: u32,
    session_minutes: i64,
    granularity_minutes: i64,
    minutes_per_unit: i64,
}

impl Horizon {
    fn total_minutes(&self) -> i64 {
        i64::from(self.days) * MINUTES_PER_DAY
    }

    /// Local ISO weeks touched by `[start, end)`, in order.
    fn weeks(&self, tz: Tz) -> Vec<IsoWeek> {
        let first = self.start.with_timezone(&tz).date_naive();
        let last = (self.end - Duration::minutes(1)).with_timezone(&tz).date_naive();
        let mut weeks: Vec<IsoWeek> = Vec::new();
        for date in first.iter_days().take_while(|date| *date <= last) {
            let week = date.iso_week();
            if weeks.last() != Some(&week) {
                weeks.push(week);
            }
        }
        weeks
    }
}

type PairScores = HashMap<(String, String), Result<f64, String>>;

pub struct ScheduleOptimizer {
    detector: ConflictDetector,
    scorer: CompatibilityScorer,
    default_granularity_minutes: u32,
}

impl ScheduleOptimizer {
    pub fn new(config: &EngineConfig, scorer: CompatibilityScorer) -> Self {
        Self {
            detector: ConflictDetector::new(config.timezone),
            scorer,
            default_granularity_minutes: config.slot_granularity_minutes,
        }
    }

    /// Greedy batch assignment of clients to therapists and first free slots.
    pub fn optimize_batch(
        &self,
        clients: &[Client],
        therapists: &[Therapist],
        existing_sessions: &[ExistingSession],
        constraints: &ScheduleConstraints,
        cancel: &CancellationFlag,
    ) -> AppResult<AssignmentPlan> {
        self.optimize_batch_with_progress(clients, therapists, existing_sessions, constraints, cancel, |_| {})
    }

    /// Same as [`optimize_batch`](Self::optimize_batch), calling `on_progress`
    /// after every client the fold places or rejects.
    pub fn optimize_batch_with_progress(
        &self,
        clients: &[Client],
        therapists: &[Therapist],
        existing_sessions: &[ExistingSession],
        constraints: &ScheduleConstraints,
        cancel: &CancellationFlag,
        mut on_progress: impl FnMut(&BatchProgress),
    ) -> AppResult<AssignmentPlan> {
        let started = Instant::now();
        let plan_id = Uuid::new_v4().to_string();
        log_phase(&plan_id, BatchPhase::Pending);

        let horizon = self.resolve_horizon(constraints)?;
        validate_batch(clients, therapists, existing_sessions)?;

        let ordered = order_clients(clients, existing_sessions, horizon.minutes_per_unit);
        let mut therapists_by_id: Vec<&Therapist> = therapists.iter().collect();
        therapists_by_id.sort_by(|a, b| a.id.cmp(&b.id));

        log_phase(&plan_id, BatchPhase::Scoring);
        let stats_before = self.scorer.cache().stats();
        let scores = self.score_pairs(&ordered, &therapists_by_id);
        let stats_after = self.scorer.cache().stats();

        log_phase(&plan_id, BatchPhase::Assigning);
        let initial = FoldState {
            occupancy: Occupancy::from_snapshot(existing_sessions, self.detector.timezone()),
            assignments: Vec::new(),
            unassigned: Vec::new(),
            unprocessed: Vec::new(),
            cancelled: false,
        };

        let state = ordered.iter().fold(initial, |mut state, client| {
            if state.cancelled || cancel.is_cancelled() {
                if !state.cancelled {
                    info!(target: "engine::optimizer", plan_id = %plan_id, at_client = %client.id, "batch cancelled");
                }
                state.cancelled = true;
                state.unprocessed.push(client.id.clone());
                return state;
            }

            let assigned = match self.place_client(client, &therapists_by_id, &scores, &state.occupancy, &horizon) {
                Ok(Placement::Assigned(assignment)) => {
                    state.occupancy = state.occupancy.record(&plan_id, &assignment);
                    state.assignments.push(assignment);
                    true
                }
                Ok(Placement::Unassigned(reasons)) => {
                    state.unassigned.push(UnassignedClient {
                        client_id: client.id.clone(),
                        reasons,
                    });
                    false
                }
                Err(err) => {
                    warn!(target: "engine::optimizer", client_id = %client.id, error = %err, "client placement failed");
                    state.unassigned.push(UnassignedClient {
                        client_id: client.id.clone(),
                        reasons: vec![err.to_string()],
                    });
                    false
                }
            };

            on_progress(&BatchProgress {
                client_id: client.id.clone(),
                assigned,
                processed: state.assignments.len() + state.unassigned.len(),
                total: ordered.len(),
            });
            state
        });

        let warnings = if state.cancelled {
            Vec::new()
        } else {
            under_minimum_warnings(&therapists_by_id, &state.occupancy, &horizon.weeks(self.detector.timezone()))
        };

        let plan = AssignmentPlan {
            id: plan_id,
            assignments: state.assignments,
            unassigned: state.unassigned,
            cancelled: state.cancelled,
            unprocessed_client_ids: state.unprocessed,
            warnings,
            stats: PlanStats {
                clients_considered: ordered.len(),
                pairs_scored: scores.len(),
                cache_hits: stats_after.hits.saturating_sub(stats_before.hits),
                cache_misses: stats_after.misses.saturating_sub(stats_before.misses),
                elapsed_ms: started.elapsed().as_millis(),
            },
        };

        log_phase(&plan.id, BatchPhase::Done);
        info!(
            target: "engine::optimizer",
            plan_id = %plan.id,
            assigned = plan.assignments.len(),
            unassigned = plan.unassigned.len(),
            unprocessed = plan.unprocessed_client_ids.len(),
            cancelled = plan.cancelled,
            elapsed_ms = plan.stats.elapsed_ms as u64,
            "batch finished"
        );

        Ok(plan)
    }

    fn resolve_horizon(&self, constraints: &ScheduleConstraints) -> AppResult<Horizon> {
        let granularity = constraints
            .slot_granularity_minutes
            .unwrap_or(self.default_granularity_minutes);

        let invalid = [
            ("horizonDays", constraints.horizon_days),
            ("sessionMinutes", constraints.session_minutes),
            ("slotGranularityMinutes", granularity),
            ("minutesPerUnit", constraints.minutes_per_unit),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((field, _)) = invalid {
            return Err(AppError::validation_with_details(
                "schedule constraints must be positive",
                json!({"field": field}),
            ));
        }

        let days = constraints.horizon_days;
        let start = constraints.horizon_start;
        let end = schedule_utils::add_minutes(start, i64::from(days) * MINUTES_PER_DAY)?;

        Ok(Horizon {
            start,
            end,
            days,
            session_minutes: i64::from(constraints.session_minutes),
            granularity_minutes: i64::from(granularity),
            minutes_per_unit: i64::from(constraints.minutes_per_unit),
        })
    }

    fn score_pairs(&self, clients: &[&Client], therapists: &[&Therapist]) -> PairScores {
        let pairs: Vec<(&Therapist, &Client)> = clients
            .iter()
            .flat_map(|client| {
                therapists
                    .iter()
                    .filter(move |therapist| offers_requested_service(therapist, client))
                    .map(move |therapist| (*therapist, *client))
            })
            .collect();

        let results = self.scorer.score_many(&pairs);
        let mut failures = 0usize;
        let scores: PairScores = pairs
            .iter()
            .zip(results)
            .map(|((therapist, client), result)| {
                let result = result.map_err(|err| {
                    failures += 1;
                    err.to_string()
                });
                ((therapist.id.clone(), client.id.clone()), result)
            })
            .collect();

        debug!(target: "engine::optimizer", pairs = scores.len(), failures, "pair scoring finished");
        scores
    }

    fn place_client(
        &self,
        client: &Client,
        therapists: &[&Therapist],
        scores: &PairScores,
        occupancy: &Occupancy,
        horizon: &Horizon,
    ) -> AppResult<Placement> {
        if therapists.is_empty() {
            return Ok(Placement::Unassigned(vec!["no therapists available".into()]));
        }

        let booked_by_client: i64 = occupancy
            .sessions
            .iter()
            .filter(|s| s.status.blocks_time() && s.client_id == client.id)
            .map(ExistingSession::minutes)
            .sum();
        let remaining = i64::from(client.authorized_units) * horizon.minutes_per_unit - booked_by_client;
        if remaining < horizon.session_minutes {
            return Ok(Placement::Unassigned(vec![format!(
                "insufficient authorized units ({} minutes remaining, {} required)",
                remaining.max(0),
                horizon.session_minutes
            )]));
        }

        let mut reasons = Vec::new();
        let mut best: Option<Candidate> = None;

        for &therapist in therapists {
            let compatibility = match scores.get(&(therapist.id.clone(), client.id.clone())) {
                None => {
                    reasons.push(format!("{}: does not offer the requested services", therapist.id));
                    continue;
                }
                Some(Err(message)) => {
                    reasons.push(format!("{}: {message}", therapist.id));
                    continue;
                }
                Some(Ok(value)) => *value,
            };

            let load = occupancy.running_load(therapist);
            let capped = therapist.max_clients > 0 && load >= therapist.max_clients;
            if capped && !occupancy.already_serves(&therapist.id, &client.id) {
                reasons.push(format!(
                    "{}: caseload full ({load}/{})",
                    therapist.id, therapist.max_clients
                ));
                continue;
            }

            if self.scorer.shared_minutes(therapist, client) == 0 {
                reasons.push(format!("{}: no shared weekly availability", therapist.id));
                continue;
            }

            let start_time = match self.earliest_slot(therapist, client, occupancy, horizon)? {
                Ok(start_time) => start_time,
                Err(rejections) if rejections.only_weekly_cap() => {
                    reasons.push(format!(
                        "{}: weekly hour cap of {:.1} reached",
                        therapist.id, therapist.max_weekly_hours
                    ));
                    continue;
                }
                Err(rejections) => {
                    reasons.push(format!(
                        "{}: no conflict-free slot in horizon{}",
                        therapist.id,
                        rejections.summary()
                    ));
                    continue;
                }
            };

            let offset = (start_time - horizon.start).num_minutes() as f64;
            let fit = 1.0 - 0.5 * offset / horizon.total_minutes() as f64;
            let candidate = Candidate {
                therapist,
                start_time,
                compatibility,
                combined: compatibility * fit,
                load,
            };

            best = match best {
                Some(current) if !outranks(&candidate, &current) => Some(current),
                _ => Some(candidate),
            };
        }

        let Some(chosen) = best else {
            return Ok(Placement::Unassigned(reasons));
        };

        let end_time = schedule_utils::add_minutes(chosen.start_time, horizon.session_minutes)?;
        debug!(
            target: "engine::optimizer",
            client_id = %client.id,
            therapist_id = %chosen.therapist.id,
            start = %chosen.start_time,
            score = chosen.combined,
            "client assigned"
        );

        Ok(Placement::Assigned(Assignment {
            client_id: client.id.clone(),
            therapist_id: chosen.therapist.id.clone(),
            start_time: chosen.start_time,
            end_time,
            score: chosen.combined,
            compatibility: chosen.compatibility,
        }))
    }

    /// First conflict-free start in the horizon whose week still has room
    /// under the therapist's weekly cap, or the tally of why each candidate
    /// slot was rejected.
    fn earliest_slot(
        &self,
        therapist: &Therapist,
        client: &Client,
        occupancy: &Occupancy,
        horizon: &Horizon,
    ) -> AppResult<Result<DateTime<Utc>, SlotRejections>> {
        let tz = self.detector.timezone();
        let first_date = horizon.start.with_timezone(&tz).date_naive();
        let cap_minutes = weekly_cap_minutes(therapist);
        let mut rejections = SlotRejections::default();

        // One extra local day covers horizons that start mid-day.
        for day in 0..=i64::from(horizon.days) {
            let Some(date) = first_date.checked_add_signed(Duration::days(day)) else {
                continue;
            };
            let weekday = date.weekday();
            let Some(window) = therapist.availability.shared_window(weekday, &client.availability) else {
                continue;
            };

            for start in schedule_utils::slot_starts(
                window.start,
                window.end,
                horizon.session_minutes,
                horizon.granularity_minutes,
            ) {
                let Some(start_time) = schedule_utils::at_local(date, start, tz) else {
                    continue;
                };
                let end_time = schedule_utils::add_minutes(start_time, horizon.session_minutes)?;
                if start_time < horizon.start || end_time > horizon.end {
                    continue;
                }

                if let Some(cap) = cap_minutes {
                    let week = occupancy.week_of(start_time);
                    if occupancy.booked_in_week(&therapist.id, week) + horizon.session_minutes > cap {
                        rejections.over_weekly_cap += 1;
                        continue;
                    }
                }

                let proposal = ProposedSession::new(start_time, end_time, therapist.id.clone(), client.id.clone());
                let conflicts = self.detector.collect(&proposal, &occupancy.sessions, therapist, client);
                if conflicts.is_empty() {
                    return Ok(Ok(start_time));
                }
                for conflict in conflicts {
                    rejections.tally(conflict.conflict_type);
                }
            }
        }

        Ok(Err(rejections))
    }
}

fn log_phase(plan_id: &str, phase: BatchPhase) {
    info!(target: "engine::optimizer", plan_id = %plan_id, phase = %phase, "batch phase");
}

fn validate_batch(
    clients: &[Client],
    therapists: &[Therapist],
    existing_sessions: &[ExistingSession],
) -> AppResult<()> {
    ensure_unique_ids("client", clients.iter().map(|c| c.id.as_str()))?;
    ensure_unique_ids("therapist", therapists.iter().map(|t| t.id.as_str()))?;

    if let Some(session) = existing_sessions.iter().find(|s| s.end_time <= s.start_time) {
        return Err(AppError::validation_with_details(
            "existing session end time must be after its start time",
            json!({"sessionId": session.id}),
        ));
    }
    Ok(())
}

fn ensure_unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> AppResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(AppError::validation(format!("{kind} id is required")));
        }
        if !seen.insert(id) {
            return Err(AppError::validation_with_details(
                format!("duplicate {kind} id"),
                json!({"id": id}),
            ));
        }
    }
    Ok(())
}

/// Ascending by unused authorized minutes, then id.
fn order_clients<'a>(
    clients: &'a [Client],
    existing_sessions: &[ExistingSession],
    minutes_per_unit: i64,
) -> Vec<&'a Client> {
    let mut booked: HashMap<&str, i64> = HashMap::new();
    for session in existing_sessions.iter().filter(|s| s.status.blocks_time()) {
        *booked.entry(session.client_id.as_str()).or_default() += session.minutes();
    }

    let unused = |client: &Client| {
        let authorized = i64::from(client.authorized_units) * minutes_per_unit;
        (authorized - booked.get(client.id.as_str()).copied().unwrap_or(0)).max(0)
    };

    let mut ordered: Vec<&Client> = clients.iter().collect();
    ordered.sort_by(|a, b| unused(a).cmp(&unused(b)).then_with(|| a.id.cmp(&b.id)));
    ordered
}

fn offers_requested_service(therapist: &Therapist, client: &Client) -> bool {
    client.service_preferences.iter().any(|wanted| {
        let wanted = wanted.trim();
        therapist
            .service_types
            .iter()
            .any(|offered| offered.trim().eq_ignore_ascii_case(wanted))
    })
}

/// Higher combined score wins; near-ties go to the lighter caseload, then id.
fn outranks(candidate: &Candidate, current: &Candidate) -> bool {
    let delta = candidate.combined - current.combined;
    if delta.abs() >= SCORE_EPSILON {
        return delta > 0.0;
    }
    match candidate.load.cmp(&current.load) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.therapist.id < current.therapist.id,
    }
}

/// `None` when the therapist has no weekly cap.
fn weekly_cap_minutes(therapist: &Therapist) -> Option<i64> {
    (therapist.max_weekly_hours > 0.0).then(|| (therapist.max_weekly_hours * 60.0).round() as i64)
}

fn under_minimum_warnings(therapists: &[&Therapist], occupancy: &Occupancy, weeks: &[IsoWeek]) -> Vec<String> {
    therapists
        .iter()
        .filter(|t| t.min_weekly_hours > 0.0)
        .flat_map(|t| {
            weeks.iter().filter_map(move |week| {
                let hours = occupancy.booked_in_week(&t.id, *week) as f64 / 60.0;
                (hours < t.min_weekly_hours).then(|| {
                    format!(
                        "Therapist {} ({}) is scheduled for {:.1} of a minimum {:.1} weekly hours in {}-W{:02}",
                        t.id,
                        t.name,
                        hours,
                        t.min_weekly_hours,
                        week.year(),
                        week.week()
                    )
                })
            })
        })
        .collect()
}
