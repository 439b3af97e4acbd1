use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("gRPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("RPC timed out")]
    Timeout,

    #[error("Discovery service unreachable: {0}")]
    Discovery(String),

    #[error("Invalid address: {0}")]
    InvalidAddr(#[from] std::net::AddrParseError),

    #[error("Task queue is at capacity")]
    QueueFull,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GridError>;
