//! Handler module - service registration and request dispatch.
//!
//! Provides:
//! - [`ServiceDescriptor`] - a named service with typed method handlers
//! - [`ServiceRegistry`] - maps service names to descriptors and dispatches
//! - [`CallContext`] - identity of the call being handled
//! - [`Outcome`] - a handler's value and/or error
//!
//! # Example
//!
//! ```
//! use minirpc::handler::{Outcome, ServiceDescriptor, ServiceRegistry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct GetByIdReq {
//!     id: i64,
//! }
//!
//! #[derive(Serialize)]
//! #[serde(rename_all = "PascalCase")]
//! struct GetByIdResp {
//!     msg: String,
//! }
//!
//! let mut registry = ServiceRegistry::new();
//! registry.register(
//!     ServiceDescriptor::new("user-service").method("GetById", |_ctx, req: GetByIdReq| async move {
//!         Outcome::ok(GetByIdResp { msg: req.id.to_string() })
//!     }),
//! );
//! ```

mod context;
mod descriptor;
mod registry;

pub use context::CallContext;
pub use descriptor::{MethodHandler, MethodOutput, Outcome, ServiceDescriptor, TypedMethod};
pub use registry::{ServiceRegistry, METHOD_NOT_FOUND, SERVICE_NOT_FOUND};
