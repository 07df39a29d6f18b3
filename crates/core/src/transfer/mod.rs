//! Streaming transfer protocol.
//!
//! Uploads and downloads are explicit state machines advanced one message at a time. Each
//! session owns every resource it opens, so ending a session early (error, deadline or a dropped
//! future) releases those resources through `Drop`.

mod download;
mod upload;

pub use download::{DownloadMessage, DownloadPhase, DownloadSession};
pub use upload::{UploadMessage, UploadPhase, UploadSession};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Filenames with an upload in flight.
///
/// Closes the window between writing bytes and creating the metadata record: only one upload
/// per filename can be past `AwaitingMetadata` at a time.
#[derive(Debug, Default, Clone)]
pub(crate) struct Reservations {
    names: Arc<Mutex<HashSet<String>>>,
}

impl Reservations {
    pub(crate) fn try_reserve(&self, filename: &str) -> Option<Reservation> {
        if !self.names.lock().insert(filename.to_owned()) {
            return None;
        }
        Some(Reservation {
            names: Arc::clone(&self.names),
            filename: filename.to_owned(),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_reserved(&self, filename: &str) -> bool {
        self.names.lock().contains(filename)
    }
}

/// Held for the lifetime of one upload; releases the name on drop.
#[derive(Debug)]
pub(crate) struct Reservation {
    names: Arc<Mutex<HashSet<String>>>,
    filename: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.names.lock().remove(&self.filename);
    }
}
