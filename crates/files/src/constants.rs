/// Directory under the storage root holding committed blobs.
pub const BLOBS_DIR_NAME: &str = "blobs";

/// Directory under the storage root holding in-flight writes.
pub const STAGING_DIR_NAME: &str = "staging";

/// Suffix appended to staging files.
pub const STAGING_SUFFIX: &str = "part";
