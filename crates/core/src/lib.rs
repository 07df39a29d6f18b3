//! # DFS Core
//!
//! Core logic for the DFS file service.
//!
//! This crate contains the data operations behind every RPC:
//! - [`MetadataStore`]: the concurrent filename → [`FileRecord`] index
//! - [`UploadSession`] / [`DownloadSession`]: the chunked transfer state machines
//! - [`StorageService`]: keeps metadata and blob bytes consistent across both
//!
//! **No API concerns**: gRPC servers, wire types and status codes belong in `api-grpc` and
//! `api-shared`.

pub mod config;
pub mod constants;
mod error;
mod metadata;
mod service;
mod transfer;

pub use config::CoreConfig;
pub use error::{
    CoreError, CoreResult, MetadataError, MetadataResult, TransferError, TransferResult,
};
pub use metadata::{FileRecord, InMemoryMetadataStore, MetadataStore};
pub use service::{DeleteOutcome, StorageService};
pub use transfer::{
    DownloadMessage, DownloadPhase, DownloadSession, UploadMessage, UploadPhase, UploadSession,
};

pub use dfs_files::FilesError;
pub use dfs_types::{Filename, FilenameError};
