use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::commands::{CacheClearResult, CommandError, CommandResult, EngineState};
use crate::error::AppError;
use crate::models::plan::{AssignmentPlan, ScheduleConstraints};
use crate::models::scheduling::{Alternative, Client, Conflict, ExistingSession, Therapist};
use crate::services::conflict_detector::ProposedSession;
use crate::services::schedule_optimizer::CancellationFlag;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectConflictsInput {
    #[serde(flatten)]
    pub session: ProposedSession,
    #[serde(default, alias = "existing_sessions")]
    pub existing_sessions: Vec<ExistingSession>,
    pub therapist: Therapist,
    pub client: Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestAlternativesInput {
    #[serde(flatten)]
    pub session: ProposedSession,
    #[serde(default, alias = "existing_sessions")]
    pub existing_sessions: Vec<ExistingSession>,
    pub therapist: Therapist,
    pub client: Client,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeScheduleInput {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub therapists: Vec<Therapist>,
    #[serde(default, alias = "existing_sessions")]
    pub existing_sessions: Vec<ExistingSession>,
    pub constraints: ScheduleConstraints,
}

pub async fn detect_scheduling_conflicts(
    state: &EngineState,
    input: DetectConflictsInput,
) -> CommandResult<Vec<Conflict>> {
    state
        .detector()
        .detect(&input.session, &input.existing_sessions, &input.therapist, &input.client)
        .map_err(CommandError::from)
}

pub async fn suggest_alternative_times(
    state: &EngineState,
    input: SuggestAlternativesInput,
) -> CommandResult<Vec<Alternative>> {
    state
        .suggester()
        .suggest(
            &input.session,
            &input.existing_sessions,
            &input.therapist,
            &input.client,
            &input.conflicts,
        )
        .await
        .map_err(CommandError::from)
}

pub async fn optimize_schedule(
    state: &EngineState,
    input: OptimizeScheduleInput,
) -> CommandResult<AssignmentPlan> {
    optimize_schedule_cancellable(state, input, CancellationFlag::new()).await
}

/// Runs the batch off the async executor; `cancel` may be flipped from any
/// task while it runs.
pub async fn optimize_schedule_cancellable(
    state: &EngineState,
    input: OptimizeScheduleInput,
    cancel: CancellationFlag,
) -> CommandResult<AssignmentPlan> {
    let optimizer = state.optimizer();
    run_blocking(move || {
        optimizer.optimize_batch(
            &input.clients,
            &input.therapists,
            &input.existing_sessions,
            &input.constraints,
            &cancel,
        )
    })
    .await
}

pub async fn clear_schedule_cache(state: &EngineState) -> CommandResult<CacheClearResult> {
    let result = state.clear_cache();
    debug!(target: "engine::command", entries = result.entries_cleared, "schedule cache cleared");
    Ok(result)
}

/// Routes a named operation with a JSON payload, for RPC or HTTP hosts.
pub async fn dispatch(
    state: &EngineState,
    operation: &str,
    payload: JsonValue,
) -> CommandResult<JsonValue> {
    debug!(target: "engine::command", %operation, "dispatching");
    match operation {
        "detect_scheduling_conflicts" => {
            to_json(detect_scheduling_conflicts(state, from_json(payload)?).await?)
        }
        "suggest_alternative_times" => {
            to_json(suggest_alternative_times(state, from_json(payload)?).await?)
        }
        "optimize_schedule" => to_json(optimize_schedule(state, from_json(payload)?).await?),
        "clear_schedule_cache" => to_json(clear_schedule_cache(state).await?),
        other => Err(CommandError::unknown_operation(other)),
    }
}

fn from_json<T: DeserializeOwned>(payload: JsonValue) -> CommandResult<T> {
    serde_json::from_value(payload).map_err(|err| {
        CommandError::from(AppError::validation_with_details(
            "invalid request payload",
            serde_json::json!({ "error": err.to_string() }),
        ))
    })
}

fn to_json<T: Serialize>(value: T) -> CommandResult<JsonValue> {
    serde_json::to_value(value).map_err(|err| CommandError::from(AppError::Serialization(err)))
}

async fn run_blocking<T: Send + 'static>(
    task: impl FnOnce() -> Result<T, AppError> + Send + 'static,
) -> CommandResult<T> {
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| CommandError::new("UNKNOWN", format!("batch task failed to complete: {err}"), None))?
        .map_err(CommandError::from)
}
