//! Registry mapping service names to descriptors, and request dispatch.
//!
//! Dispatch never fails: every problem short of a broken connection is
//! reported through the response's error text, and the response always
//! echoes the request's message id, version, compressor and serializer.

use std::collections::HashMap;

use bytes::Bytes;

use super::{CallContext, ServiceDescriptor};
use crate::codec::Codec;
use crate::compress::Compression;
use crate::protocol::{Request, Response};

/// Error text for an unregistered service.
pub const SERVICE_NOT_FOUND: &str = "service not found";

/// Error text for an unknown method on a registered service.
pub const METHOD_NOT_FOUND: &str = "method not found";

/// Registry of services by name.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. Re-registering a name replaces the earlier one.
    pub fn register(&mut self, service: ServiceDescriptor) {
        let name = service.name().to_string();
        if self.services.insert(name.clone(), service).is_some() {
            tracing::warn!(service = %name, "service re-registered, replacing previous");
        } else {
            tracing::debug!(service = %name, "service registered");
        }
    }

    /// Look up a service.
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Route a request to its method and build the response.
    pub async fn dispatch(&self, req: &Request) -> Response {
        let resp = Response::for_request(req);

        let Some(service) = self.services.get(&req.service_name) else {
            tracing::debug!(service = %req.service_name, "unknown service");
            return resp.with_error(SERVICE_NOT_FOUND);
        };
        let Some(method) = service.get_method(&req.method_name) else {
            tracing::debug!(
                service = %req.service_name,
                method = %req.method_name,
                "unknown method"
            );
            return resp.with_error(METHOD_NOT_FOUND);
        };

        let codec = match Codec::from_id(req.serializer_id) {
            Ok(c) => c,
            Err(e) => return resp.with_error(e.to_string()),
        };
        let compression = match Compression::from_id(req.compressor_id) {
            Ok(c) => c,
            Err(e) => return resp.with_error(e.to_string()),
        };
        let argument = match compression.decompress(&req.payload) {
            Ok(a) => a,
            Err(e) => return resp.with_error(e.to_string()),
        };

        let ctx = CallContext::new(req.message_id, &req.service_name, &req.method_name);
        let output = method.call(ctx, codec, &argument).await;

        let payload = match compression.compress(&output.payload) {
            Ok(p) => p,
            Err(e) => return resp.with_error(e.to_string()),
        };

        let mut resp = resp.with_error(output.error);
        resp.payload = Bytes::from(payload);
        resp
    }
}
