use dfs_core::TransferError;
use tonic::Status;

/// Maps a core transfer error onto the gRPC status returned to the caller.
pub fn status_from_transfer_error(err: &TransferError) -> Status {
    match err {
        TransferError::InvalidSequence(_) => Status::failed_precondition(err.to_string()),
        TransferError::InvalidFilename(_) => Status::invalid_argument(err.to_string()),
        TransferError::AlreadyExists(_) => Status::already_exists(err.to_string()),
        TransferError::NotFound(_) => Status::not_found(err.to_string()),
        TransferError::Io(_) => Status::internal(err.to_string()),
        TransferError::Transport(_) => Status::aborted(err.to_string()),
        TransferError::DeadlineExceeded => Status::deadline_exceeded(err.to_string()),
    }
}
