// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::command_key::CommandKey;
use crate::error::RpcError;

/// Outcome of a remote call.
pub type RpcResult = Result<Value, RpcError>;

/// One outbound or inbound call as seen by the interceptor.
///
/// # Examples
///
/// ```
/// use breakwater::Invocation;
/// use serde_json::json;
///
/// let invocation = Invocation::new("com.example.Greeter", "sayHi", ["String"], [json!("Ada")]);
///
/// assert_eq!(invocation.key().as_str(), "com.example.Greeter.sayHi#String");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    interface: String,
    method: String,
    param_types: Vec<String>,
    args: Vec<Value>,
}

impl Invocation {
    /// Describes a call of `method` on `interface`.
    ///
    /// `param_types` are the declared parameter type names that take part in the command key. `args`
    /// are the call arguments handed to fallback and degrade handlers.
    pub fn new<P, A>(interface: impl Into<String>, method: impl Into<String>, param_types: P, args: A) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        A: IntoIterator<Item = Value>,
    {
        Self {
            interface: interface.into(),
            method: method.into(),
            param_types: param_types.into_iter().map(Into::into).collect(),
            args: args.into_iter().collect(),
        }
    }

    /// Fully qualified name of the remote interface.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Name of the called method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Declared parameter type names.
    #[must_use]
    pub fn param_types(&self) -> &[String] {
        &self.param_types
    }

    /// Call arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The command key identifying this call site.
    #[must_use]
    pub fn key(&self) -> CommandKey {
        CommandKey::derive(&self.interface, &self.method, &self.param_types)
    }
}

/// Performs the actual remote call.
///
/// Implemented for every `Fn(&Invocation) -> impl Future<Output = RpcResult>` closure whose future
/// does not borrow the invocation.
pub trait Invoker: Send + Sync {
    /// Starts the call described by `invocation`.
    fn invoke(&self, invocation: &Invocation) -> BoxFuture<'static, RpcResult>;
}

impl<F, Fut> Invoker for F
where
    F: Fn(&Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = RpcResult> + Send + 'static,
{
    fn invoke(&self, invocation: &Invocation) -> BoxFuture<'static, RpcResult> {
        Box::pin(self(invocation))
    }
}
