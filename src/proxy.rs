//! Client-side stubs synthesized from a service description.
//!
//! A [`ServiceDescription`] lists a service's operations with their argument
//! and result types. [`synthesize`] validates it once and binds every
//! operation to an [`Invoker`], producing a [`StubSet`]. Typed [`Stub`]s are
//! then taken out of the set by name and called like local async functions.
//!
//! A call's [`Reply`] carries the decoded result *and* any error, so a value
//! returned alongside a handler error is not lost.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use minirpc::proxy::{synthesize, ServiceDescription, Stub};
//! use minirpc::Client;
//!
//! # #[derive(serde::Serialize)] struct GetByIdReq { id: i64 }
//! # #[derive(serde::Deserialize, Default)] struct GetByIdResp { msg: String }
//! struct UserService {
//!     get_by_id: Stub<GetByIdReq, GetByIdResp>,
//! }
//!
//! # async fn run() -> minirpc::Result<()> {
//! let client = Arc::new(Client::builder("127.0.0.1:8081").build().await?);
//! let description = ServiceDescription::new("user-service")
//!     .operation::<GetByIdReq, GetByIdResp>("GetById");
//! let stubs = synthesize(&description, client)?;
//! let users = UserService { get_by_id: stubs.stub("GetById")? };
//!
//! let reply = users.get_by_id.call(&GetByIdReq { id: 123 }).await;
//! println!("{} {:?}", reply.value.msg, reply.error);
//! # Ok(())
//! # }
//! ```

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::client::Invoker;
use crate::error::{Result, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shape {
    id: TypeId,
    name: &'static str,
}

impl Shape {
    fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

#[derive(Debug, Clone)]
struct OperationSpec {
    name: String,
    argument: Shape,
    result: Shape,
}

/// Names a remote service and the typed operations it offers.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    name: String,
    operations: Vec<OperationSpec>,
}

impl ServiceDescription {
    /// Describe a service by its registered name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
        }
    }

    /// Declare an operation taking `A` and returning `R`.
    ///
    /// The operation name is sent as the method name.
    pub fn operation<A, R>(mut self, name: impl Into<String>) -> Self
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Default + Send + 'static,
    {
        self.operations.push(OperationSpec {
            name: name.into(),
            argument: Shape::of::<A>(),
            result: Shape::of::<R>(),
        });
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared operation names, in declaration order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().map(|op| op.name.as_str())
    }
}

/// Validate `description` and bind each operation to `invoker`.
///
/// Does no network activity.
///
/// # Errors
///
/// [`RpcError::InvalidDescription`] if the service name is empty, there are no
/// operations, an operation name is empty, or a name is declared twice.
pub fn synthesize(description: &ServiceDescription, invoker: Arc<dyn Invoker>) -> Result<StubSet> {
    if description.name.is_empty() {
        return Err(RpcError::InvalidDescription(
            "service name is empty".to_string(),
        ));
    }
    if description.operations.is_empty() {
        return Err(RpcError::InvalidDescription(format!(
            "service {} declares no operations",
            description.name
        )));
    }

    let service: Arc<str> = Arc::from(description.name.as_str());
    let mut seen = HashSet::new();
    let mut operations = HashMap::with_capacity(description.operations.len());
    for op in &description.operations {
        if op.name.is_empty() {
            return Err(RpcError::InvalidDescription(format!(
                "service {} has an operation with an empty name",
                description.name
            )));
        }
        if !seen.insert(op.name.as_str()) {
            return Err(RpcError::InvalidDescription(format!(
                "operation {} declared twice on service {}",
                op.name, description.name
            )));
        }
        operations.insert(
            op.name.clone(),
            BoundOperation {
                service: service.clone(),
                method: Arc::from(op.name.as_str()),
                argument: op.argument,
                result: op.result,
                invoker: invoker.clone(),
            },
        );
    }

    tracing::debug!(
        service = %description.name,
        operations = operations.len(),
        "stubs synthesized"
    );
    Ok(StubSet {
        service,
        operations,
    })
}

#[derive(Clone)]
struct BoundOperation {
    service: Arc<str>,
    method: Arc<str>,
    argument: Shape,
    result: Shape,
    invoker: Arc<dyn Invoker>,
}

/// The bound operations of one service.
pub struct StubSet {
    service: Arc<str>,
    operations: HashMap<String, BoundOperation>,
}

impl StubSet {
    /// Service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Take a typed stub for operation `name`.
    ///
    /// `A` and `R` must be the types the operation was declared with.
    pub fn stub<A, R>(&self, name: &str) -> Result<Stub<A, R>>
    where
        A: Serialize + Send + Sync + 'static,
        R: DeserializeOwned + Default + Send + 'static,
    {
        let op = self.operations.get(name).ok_or_else(|| {
            RpcError::InvalidDescription(format!(
                "service {} has no operation {}",
                self.service, name
            ))
        })?;

        let (argument, result) = (Shape::of::<A>(), Shape::of::<R>());
        if op.argument != argument || op.result != result {
            return Err(RpcError::InvalidDescription(format!(
                "operation {} declared as ({}) -> {}, requested as ({}) -> {}",
                name, op.argument.name, op.result.name, argument.name, result.name
            )));
        }

        Ok(Stub {
            op: op.clone(),
            _phantom: PhantomData,
        })
    }

    /// Bound operation names, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for StubSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubSet")
            .field("service", &self.service)
            .field("operations", &self.operation_names())
            .finish()
    }
}

/// Result of a stub call.
///
/// `value` is the decoded result, or `R::default()` when the response carried
/// no payload or the call failed. `error` is set for transport failures and
/// for handler errors; in the latter case `value` may still hold data.
#[derive(Debug)]
pub struct Reply<R> {
    /// Decoded result value.
    pub value: R,
    /// Transport, codec or business error.
    pub error: Option<RpcError>,
}

impl<R> Reply<R> {
    fn failed(error: RpcError) -> Self
    where
        R: Default,
    {
        Self {
            value: R::default(),
            error: Some(error),
        }
    }

    /// True when no error was reported.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Split into value and error.
    pub fn into_parts(self) -> (R, Option<RpcError>) {
        (self.value, self.error)
    }

    /// Collapse into a `Result`, dropping the value if there was an error.
    pub fn into_result(self) -> Result<R> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.value),
        }
    }
}

/// A typed, callable remote operation.
pub struct Stub<A, R> {
    op: BoundOperation,
    _phantom: PhantomData<fn(&A) -> R>,
}

impl<A, R> Clone for Stub<A, R> {
    fn clone(&self) -> Self {
        Self {
            op: self.op.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<A, R> fmt::Debug for Stub<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stub")
            .field("service", &self.op.service)
            .field("method", &self.op.method)
            .finish()
    }
}

impl<A, R> Stub<A, R>
where
    A: Serialize + Send + Sync + 'static,
    R: DeserializeOwned + Default + Send + 'static,
{
    /// Method name this stub calls.
    pub fn method(&self) -> &str {
        &self.op.method
    }

    /// Call with the invoker's default deadline.
    pub async fn call(&self, argument: &A) -> Reply<R> {
        let deadline = self.op.invoker.default_deadline();
        self.call_with_deadline(argument, deadline).await
    }

    /// Call with an explicit deadline for obtaining a connection.
    pub async fn call_with_deadline(&self, argument: &A, deadline: Instant) -> Reply<R> {
        let invoker = &self.op.invoker;
        let codec = invoker.codec();

        let encoded = match codec.encode(argument) {
            Ok(bytes) => bytes,
            Err(e) => return Reply::failed(e),
        };

        let response = match invoker
            .invoke(&self.op.service, &self.op.method, encoded, deadline)
            .await
        {
            Ok(response) => response,
            Err(e) => return Reply::failed(e),
        };

        let business = (!response.error.is_empty()).then(|| RpcError::Business(response.error));

        let value = if response.payload.is_empty() {
            R::default()
        } else {
            match codec.decode::<R>(&response.payload) {
                Ok(v) => v,
                Err(e) => {
                    if business.is_some() {
                        tracing::warn!(
                            service = %self.op.service,
                            method = %self.op.method,
                            error = %e,
                            "result decode failed alongside handler error"
                        );
                    }
                    return Reply {
                        value: R::default(),
                        error: business.or(Some(e)),
                    };
                }
            }
        };

        Reply {
            value,
            error: business,
        }
    }
}
