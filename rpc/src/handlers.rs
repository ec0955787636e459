//! RPC request handlers.

use crate::error::RpcError;
use crate::server::AppState;
use agora_governance::{
    Ballot, ComplianceRecord, ComplianceReport, Escrow, ExecutionOutcome, GovernanceError,
    Proposal, ProposalDetails, ProposalStatus, ProposalSubmission, TallyResult,
    ThresholdSnapshot, Vote, VoteChoice, VoteReceipt,
};
use agora_types::{Amount, Identity, ProposalId};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub type RpcResult<T> = Result<Json<T>, RpcError>;

fn parse_id(raw: &str) -> Result<ProposalId, RpcError> {
    Ok(raw.parse::<ProposalId>()?)
}

// ── Proposals ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitProposalRequest {
    pub proposer: String,
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub fee: Amount,
    /// Caller-assigned id (hex); derived from the contents when absent.
    #[serde(default)]
    pub id: Option<String>,
}

pub async fn submit_proposal(
    State(state): State<AppState>,
    Json(req): Json<SubmitProposalRequest>,
) -> Result<(StatusCode, Json<Proposal>), RpcError> {
    let mut submission = ProposalSubmission::new(
        Identity::new(req.proposer),
        ProposalDetails {
            kind: req.kind,
            title: req.title,
            description: req.description,
        },
        req.fee,
    );
    if let Some(raw) = req.id.as_deref() {
        submission = submission.with_id(parse_id(raw)?);
    }
    let proposal = state.engine.submit_proposal(submission).await?;
    state.metrics.proposals_submitted.inc();
    Ok((StatusCode::CREATED, Json(proposal)))
}

#[derive(Debug, Deserialize)]
pub struct ListProposalsQuery {
    pub status: Option<String>,
}

pub async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<ListProposalsQuery>,
) -> RpcResult<Vec<Proposal>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ProposalStatus>)
        .transpose()?;
    Ok(Json(state.engine.list_proposals(status)?))
}

pub async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RpcResult<Proposal> {
    Ok(Json(state.engine.get_proposal(&parse_id(&id)?)?))
}

// ── Compliance ───────────────────────────────────────────────────────────

pub async fn review_compliance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RpcResult<ComplianceReport> {
    let id = parse_id(&id)?;
    let before = state.engine.get_proposal(&id)?.status;
    match state.engine.review_compliance(&id).await {
        Ok(report) => {
            if before != ProposalStatus::Open {
                state.metrics.compliance_passed.inc();
            }
            Ok(Json(report))
        }
        Err(e) => {
            if matches!(e, GovernanceError::ComplianceRejected(_)) {
                state.metrics.compliance_rejected.inc();
            }
            Err(e.into())
        }
    }
}

pub async fn compliance_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RpcResult<Vec<ComplianceRecord>> {
    Ok(Json(state.engine.compliance_history(&parse_id(&id)?)?))
}

// ── Votes ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub voter: String,
    pub choice: String,
    pub stake: Amount,
    /// Claimed weight. Checked by the engine against the stake, or against
    /// the delegation resolver when one is configured; the stake counts when
    /// absent.
    #[serde(default)]
    pub weight: Option<Amount>,
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CastVoteRequest>,
) -> RpcResult<VoteReceipt> {
    let id = parse_id(&id)?;
    let choice: VoteChoice = req.choice.parse()?;
    let mut ballot = Ballot::new(Identity::new(req.voter), choice, req.stake);
    if let Some(weight) = req.weight {
        ballot = ballot.with_weight(weight);
    }
    let receipt = state.engine.cast_vote(&id, ballot).await?;
    state.metrics.votes_cast.inc();
    Ok(Json(receipt))
}

pub async fn list_votes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RpcResult<Vec<Vote>> {
    Ok(Json(state.engine.list_votes(&parse_id(&id)?)?))
}

pub async fn get_vote(
    State(state): State<AppState>,
    Path((id, voter)): Path<(String, String)>,
) -> RpcResult<Vote> {
    let id = parse_id(&id)?;
    Ok(Json(state.engine.get_vote(&id, &Identity::new(voter))?))
}

pub async fn list_escrows(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RpcResult<Vec<Escrow>> {
    Ok(Json(state.engine.list_escrows(&parse_id(&id)?)?))
}

// ── Tally & execution ────────────────────────────────────────────────────

pub async fn close_voting(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RpcResult<TallyResult> {
    let id = parse_id(&id)?;
    let before = state.engine.get_proposal(&id)?.result;
    let result = state.engine.close_voting(&id).await?;
    if before.is_none() {
        state.metrics.record_tally(&result);
    }
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub params: serde_json::Value,
    /// Executor timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> RpcResult<ExecutionOutcome> {
    let id = parse_id(&id)?;
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.engine.default_timeout());
    let started = Instant::now();
    let result = state
        .engine
        .execute_with_timeout(&id, req.params, timeout)
        .await;
    state
        .metrics
        .execution_time_ms
        .observe(started.elapsed().as_secs_f64() * 1_000.0);
    match result {
        Ok(outcome) => {
            state.metrics.executions_succeeded.inc();
            Ok(Json(outcome))
        }
        Err(e) => {
            if matches!(
                e,
                GovernanceError::ExecutionFailed(_)
                    | GovernanceError::ExecutorUnavailable(_)
                    | GovernanceError::ExecutionConflict { .. }
            ) {
                state.metrics.executions_failed.inc();
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub actor: String,
    pub reason: String,
}

pub async fn revert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RevertRequest>,
) -> RpcResult<Proposal> {
    let id = parse_id(&id)?;
    let already = state.engine.get_proposal(&id)?.status == ProposalStatus::Reverted;
    let proposal = state
        .engine
        .revert(&id, &Identity::new(req.actor), &req.reason)
        .await?;
    if !already {
        state.metrics.reverts.inc();
    }
    Ok(Json(proposal))
}

// ── Threshold ────────────────────────────────────────────────────────────

pub async fn get_threshold(State(state): State<AppState>) -> Json<ThresholdSnapshot> {
    Json(state.engine.delegation_threshold())
}

#[derive(Debug, Deserialize)]
pub struct SetThresholdRequest {
    pub actor: String,
    pub bps: u32,
}

pub async fn set_threshold(
    State(state): State<AppState>,
    Json(req): Json<SetThresholdRequest>,
) -> RpcResult<ThresholdSnapshot> {
    let snapshot = state
        .engine
        .set_delegation_threshold(&Identity::new(req.actor), req.bps)?;
    Ok(Json(snapshot))
}

// ── Telemetry ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub threshold_bps: u32,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        threshold_bps: state.engine.delegation_threshold().bps,
    })
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, RpcError> {
    let count = |status| -> Result<i64, RpcError> {
        Ok(state.engine.list_proposals(Some(status))?.len() as i64)
    };
    state.metrics.open_proposals.set(count(ProposalStatus::Open)?);
    state
        .metrics
        .awaiting_execution
        .set(count(ProposalStatus::Approved)?);
    let body = state
        .metrics
        .render()
        .map_err(|e| RpcError::Server(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
