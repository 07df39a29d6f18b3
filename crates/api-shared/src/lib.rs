//! # API Shared
//!
//! Shared wire definitions for the DFS file service.
//!
//! Contains:
//! - Protobuf-generated types and gRPC stubs (`pb` module)
//! - The encoded file-descriptor set for server reflection
//!
//! Used by `api-grpc` (server side) and the `dfs` CLI (client side).

// The generated code is placed into OUT_DIR at build time by the build script.
pub mod pb {
    tonic::include_proto!("dfs.v1");
}

pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("proto_descriptor");

pub use pb::*;
