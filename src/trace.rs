//! Trace correlation identifiers

use uuid::Uuid;

/// Generates opaque trace and span identifiers.
pub struct TraceIdGenerator;

impl TraceIdGenerator {
    /// 32 lowercase hex characters.
    pub fn trace_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// 16 lowercase hex characters.
    pub fn span_id() -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(16);
        id
    }
}
