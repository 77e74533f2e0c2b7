//! Per-call context handed to method handlers.

use std::sync::Arc;

/// Identity of the call being handled.
///
/// Cheap to clone; handlers may move it into spawned tasks.
#[derive(Debug, Clone)]
pub struct CallContext {
    message_id: u64,
    service: Arc<str>,
    method: Arc<str>,
}

impl CallContext {
    /// Create a context for one request.
    pub fn new(message_id: u64, service: &str, method: &str) -> Self {
        Self {
            message_id,
            service: Arc::from(service),
            method: Arc::from(method),
        }
    }

    /// Message id of the request.
    #[inline]
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Service name the request was addressed to.
    #[inline]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Method name the request was addressed to.
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }
}
