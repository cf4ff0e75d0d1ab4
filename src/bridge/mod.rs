//! Function bridge.
//!
//! A [`FunctionBridge`] is one callable guest function: its signature plus
//! the invoker it runs on. Calling it checks the arity, encodes the
//! arguments into one buffer, runs the guest, and decodes the single return
//! value. Any failure along the way becomes one [`CallError`] naming the
//! function; there is no partial result.

pub mod config;

pub use config::{Config, ConfigError, FunctionDeclaration};

use crate::codec::{self, StructuredValue, Value};
use crate::error::{CallError, Error};
use crate::runtime::SharedInvoker;
use crate::schema::FunctionSignature;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A declared guest function bound to an invoker.
///
/// Built once at registration and shared by reference or clone afterwards;
/// nothing in it changes between calls.
#[derive(Clone)]
pub struct FunctionBridge {
    signature: Arc<FunctionSignature>,
    invoker: SharedInvoker,
}

impl FunctionBridge {
    pub fn new(signature: FunctionSignature, invoker: SharedInvoker) -> Self {
        Self {
            signature: Arc::new(signature),
            invoker,
        }
    }

    pub fn name(&self) -> &str {
        self.signature.name()
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    /// `name(param, ...) -> ret`, for registering with a host engine.
    pub fn declaration(&self) -> String {
        self.signature.to_string()
    }

    /// Call the guest function with `args`.
    ///
    /// Extra arguments beyond the declared parameters are ignored; too few
    /// fail before anything is encoded or sent.
    pub fn invoke<V: StructuredValue>(&self, args: &[V]) -> Result<Value, CallError> {
        self.call(args).map_err(|source| {
            let err = CallError::new(self.name(), source);
            warn!(function = self.name(), error = %err.source, "guest call failed");
            err
        })
    }

    /// [`invoke`](Self::invoke) with JSON arguments and result.
    pub fn invoke_json(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, CallError> {
        self.invoke(args).map(serde_json::Value::from)
    }

    fn call<V: StructuredValue>(&self, args: &[V]) -> Result<Value, Error> {
        self.signature.check_arguments(args.len())?;
        let input = codec::encode_args(args, self.signature.parameters())?;

        debug!(function = self.name(), input_len = input.len(), "invoking guest function");
        let output = self.invoker.lock().run(self.name(), &input)?;

        Ok(codec::decode(&output, self.signature.returns())?)
    }
}

impl fmt::Debug for FunctionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionBridge")
            .field("signature", &self.declaration())
            .finish_non_exhaustive()
    }
}

/// Bind every declared function to one shared invoker, in declaration order.
pub fn bind(config: &Config, invoker: &SharedInvoker) -> Result<Vec<FunctionBridge>, ConfigError> {
    let bridges: Vec<FunctionBridge> = config
        .signatures()?
        .into_iter()
        .map(|signature| FunctionBridge::new(signature, Arc::clone(invoker)))
        .collect();
    debug!(count = bridges.len(), "bound guest functions");
    Ok(bridges)
}
