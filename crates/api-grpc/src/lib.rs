//! # API gRPC
//!
//! gRPC server implementation for the DFS file service.
//!
//! Handles:
//! - The `FileService` tonic service, built on `dfs-core`'s `StorageService`
//! - Per-request deadlines derived from `grpc-timeout`
//! - Mapping core errors onto gRPC status codes
//!
//! Uses `api-shared` for the generated wire types.

#![warn(rust_2018_idioms)]

pub use service::{pb, DfsService, DownloadStream};
pub use status::status_from_transfer_error;

pub mod deadline;
pub mod service;
mod status;
