//! Built-in executor for `parameter_change` proposals.
//!
//! Params are `{"param": "<name>", "value": <u64>}`; see [`GovernableParam`]
//! for the accepted names. `invoke` validates the change against the current
//! parameters and stages it; the change goes live only in `commit`, once the
//! proposal is about to be recorded as executed.

use crate::dispatcher::{ExecutionReceipt, ExecutionRequest, Executor, ExecutorError};
use crate::params::{GovernableParam, ParamsHandle};
use agora_types::ProposalId;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

pub const PARAMETER_CHANGE_KIND: &str = "parameter_change";

#[derive(Deserialize)]
struct ParamChange {
    param: String,
    value: u64,
}

pub struct ParameterChangeExecutor {
    params: ParamsHandle,
    staged: Mutex<HashMap<ProposalId, (GovernableParam, u64)>>,
}

impl ParameterChangeExecutor {
    pub fn new(params: ParamsHandle) -> Self {
        Self {
            params,
            staged: Mutex::new(HashMap::new()),
        }
    }

    fn take_staged(&self, id: &ProposalId) -> Option<(GovernableParam, u64)> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
    }
}

#[async_trait]
impl Executor for ParameterChangeExecutor {
    fn name(&self) -> &str {
        PARAMETER_CHANGE_KIND
    }

    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionReceipt, ExecutorError> {
        let change: ParamChange = serde_json::from_value(request.params.clone())
            .map_err(|e| ExecutorError::Failed(format!("malformed parameter change: {e}")))?;
        let param: GovernableParam = change
            .param
            .parse()
            .map_err(|e: crate::GovernanceError| ExecutorError::Failed(e.to_string()))?;
        let mut preview = self.params.get();
        param
            .apply(&mut preview, change.value)
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(request.proposal_id, (param, change.value));
        Ok(ExecutionReceipt {
            summary: format!("{param} set to {}", change.value),
        })
    }

    fn commit(&self, request: &ExecutionRequest) -> Result<(), ExecutorError> {
        let (param, value) = self.take_staged(&request.proposal_id).ok_or_else(|| {
            ExecutorError::Failed(format!("no staged change for {}", request.proposal_id))
        })?;
        self.params
            .update(|p| param.apply(p, value))
            .map_err(|e| ExecutorError::Failed(e.to_string()))?;
        tracing::info!(proposal = %request.proposal_id, %param, value, "governance parameter changed");
        Ok(())
    }

    async fn compensate(
        &self,
        request: &ExecutionRequest,
        _receipt: &ExecutionReceipt,
    ) -> Result<(), ExecutorError> {
        if self.take_staged(&request.proposal_id).is_some() {
            tracing::info!(proposal = %request.proposal_id, "staged parameter change discarded");
        }
        Ok(())
    }
}
