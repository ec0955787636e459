//! RPC error types.

use agora_governance::GovernanceError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("server error: {0}")]
    Server(String),
}

impl From<agora_types::AgoraError> for RpcError {
    fn from(e: agora_types::AgoraError) -> Self {
        RpcError::InvalidRequest(e.to_string())
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    pub retryable: bool,
}

impl RpcError {
    pub fn status(&self) -> StatusCode {
        use GovernanceError::*;
        match self {
            RpcError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            RpcError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RpcError::Governance(e) => match e {
                NotFound(_) => StatusCode::NOT_FOUND,
                Unauthorized(_) => StatusCode::FORBIDDEN,
                InvalidChoice(_) | InvalidThreshold(_) | InvalidRequest(_)
                | UnknownProposalKind(_) | InvalidWeight { .. } => StatusCode::BAD_REQUEST,
                ComplianceRejected(_) | InsufficientBalance { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ComplianceUnavailable(_)
                | ExecutorUnavailable(_)
                | DelegationUnavailable(_)
                | SettlementIncomplete { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ExecutionFailed(_) => StatusCode::BAD_GATEWAY,
                InvalidStateTransition { .. }
                | ProposalNotOpen { .. }
                | DeadlinePassed { .. }
                | VotingInProgress { .. }
                | AlreadyLocked { .. }
                | EscrowActive(_)
                | EscrowSettled(_)
                | DuplicateProposal(_)
                | ExecutionConflict { .. }
                | ExecutionInProgress(_)
                | Store(agora_store::StoreError::Conflict(_)) => StatusCode::CONFLICT,
                Store(_) | Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Governance(e) => e.kind(),
            RpcError::InvalidRequest(_) => "invalid_request",
            RpcError::Server(_) => "server",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Governance(e) if e.is_retryable())
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, kind = self.kind(), "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}
