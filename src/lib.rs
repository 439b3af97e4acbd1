pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod grpc;
pub mod gs;
pub mod jobs;
pub mod peers;
pub mod rm;
pub mod shutdown;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("grid");
}
