/// Job identifiers are opaque strings (`job_<millis>_<suffix>`).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
