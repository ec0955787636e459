use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("governance error: {0}")]
    Governance(#[from] agora_governance::GovernanceError),

    #[error("RPC server error: {0}")]
    Rpc(#[from] agora_rpc::RpcError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
