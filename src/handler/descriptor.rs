//! Service descriptors: a named set of typed method handlers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CallContext;
use crate::codec::Codec;
use crate::pool::BoxFuture;

/// What a handler produced: a value, an error message, both, or neither.
///
/// Both halves travel back to the caller. A handler that fails part-way can
/// still return the value it built so far alongside the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<R> {
    /// Result value, encoded into the response payload when present.
    pub value: Option<R>,
    /// Error message, sent as the response error text when present.
    pub error: Option<String>,
}

impl<R> Outcome<R> {
    /// Success with a value.
    pub fn ok(value: R) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// Failure with no value.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(message.into()),
        }
    }

    /// A value and an error together.
    pub fn partial(value: R, message: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            error: Some(message.into()),
        }
    }

    /// Neither value nor error.
    pub fn empty() -> Self {
        Self {
            value: None,
            error: None,
        }
    }
}

impl<R, E: fmt::Display> From<std::result::Result<R, E>> for Outcome<R> {
    fn from(result: std::result::Result<R, E>) -> Self {
        match result {
            Ok(v) => Outcome::ok(v),
            Err(e) => Outcome::err(e.to_string()),
        }
    }
}

/// Encoded handler output, ready for a response envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodOutput {
    /// Serialized result (uncompressed); empty when there was no value.
    pub payload: Vec<u8>,
    /// Error text; empty on success.
    pub error: String,
}

/// Trait for method handlers operating on serialized arguments.
pub trait MethodHandler: Send + Sync + 'static {
    /// Decode `argument` with `codec`, run the method, encode its outcome.
    fn call(&self, ctx: CallContext, codec: Codec, argument: &[u8]) -> BoxFuture<'static, MethodOutput>;
}

/// Wrapper that deserializes the argument before calling the handler.
pub struct TypedMethod<F, A, R, Fut>
where
    F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Outcome<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(A) -> Fut>,
}

impl<F, A, R, Fut> TypedMethod<F, A, R, Fut>
where
    F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Outcome<R>> + Send + 'static,
{
    /// Create a new typed method.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, A, R, Fut> MethodHandler for TypedMethod<F, A, R, Fut>
where
    F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Outcome<R>> + Send + 'static,
{
    fn call(&self, ctx: CallContext, codec: Codec, argument: &[u8]) -> BoxFuture<'static, MethodOutput> {
        let parsed: A = match codec.decode(argument) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(
                    service = ctx.service(),
                    method = ctx.method(),
                    error = %e,
                    "argument decode failed"
                );
                let output = MethodOutput {
                    payload: Vec::new(),
                    error: e.to_string(),
                };
                return Box::pin(async move { output });
            }
        };

        let fut = (self.handler)(ctx, parsed);
        Box::pin(async move { encode_outcome(codec, fut.await) })
    }
}

fn encode_outcome<R: Serialize>(codec: Codec, outcome: Outcome<R>) -> MethodOutput {
    let mut error = outcome.error.unwrap_or_default();
    let payload = match outcome.value {
        Some(value) => match codec.encode(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "result encode failed");
                if error.is_empty() {
                    error = e.to_string();
                }
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    MethodOutput { payload, error }
}

/// A named service and its methods.
///
/// # Example
///
/// ```
/// use minirpc::handler::{Outcome, ServiceDescriptor};
///
/// let service = ServiceDescriptor::new("greeter")
///     .method("Hello", |_ctx, name: String| async move {
///         Outcome::ok(format!("hello, {name}"))
///     });
/// assert_eq!(service.name(), "greeter");
/// assert!(service.get_method("Hello").is_some());
/// ```
pub struct ServiceDescriptor {
    name: String,
    methods: HashMap<String, Box<dyn MethodHandler>>,
}

impl ServiceDescriptor {
    /// Create an empty service.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method. A second method with the same name replaces the first.
    pub fn method<F, A, R, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Outcome<R>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Box::new(TypedMethod::new(handler)));
        self
    }

    /// Service name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method handler.
    pub fn get_method(&self, name: &str) -> Option<&dyn MethodHandler> {
        self.methods.get(name).map(|m| m.as_ref())
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}
