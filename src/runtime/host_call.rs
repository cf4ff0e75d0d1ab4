//! Host-call transport (waPC).
//!
//! [`HostCallInvoker`] forwards each call's function name and input bytes to
//! a [`WapcHost`] and hands back the guest's response. The protocol itself,
//! including every guest memory access, lives in [`super::wapc`].
//!
//! A guest that hands a host import an unusable buffer has lost track of its
//! own heap, so the instance is poisoned and later calls fail fast. A trap
//! anywhere else aborts only the call that raised it.

use super::wapc::{WapcError, WapcHost};
use super::{preview, GuestRuntime, Invoker, InvokerState, Lifecycle};
use crate::error::TransportError;
use tracing::{debug, trace, warn};

pub struct HostCallInvoker {
    runtime: GuestRuntime,
    lifecycle: Lifecycle<Loaded>,
}

struct Loaded {
    host: WapcHost,
    /// Name of the import whose misuse made the instance unusable.
    poisoned: Option<String>,
}

impl HostCallInvoker {
    pub fn new(runtime: GuestRuntime) -> Self {
        Self {
            runtime,
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    pub fn instantiate(runtime: GuestRuntime, wasm: impl AsRef<[u8]>) -> Result<Self, TransportError> {
        let mut invoker = Self::new(runtime);
        invoker.load(wasm)?;
        Ok(invoker)
    }

    /// Instantiate the guest through [`WapcHost::new`].
    pub fn load(&mut self, wasm: impl AsRef<[u8]>) -> Result<(), TransportError> {
        self.lifecycle.check_loadable()?;
        let host = WapcHost::new(self.runtime.clone(), wasm)?;
        debug!("waPC guest instantiated");
        self.lifecycle = Lifecycle::Instantiated(Loaded { host, poisoned: None });
        Ok(())
    }

    /// True once a protocol violation has made the instance unusable.
    pub fn is_poisoned(&self) -> bool {
        matches!(&self.lifecycle, Lifecycle::Instantiated(l) if l.poisoned.is_some())
    }
}

impl Invoker for HostCallInvoker {
    fn run(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, TransportError> {
        let loaded = self.lifecycle.loaded_mut()?;
        if let Some(import) = &loaded.poisoned {
            return Err(TransportError::Poisoned(import.clone()));
        }

        debug!(function, input_len = input.len(), "waPC call");
        trace!(function, input = %preview(input), "waPC input");

        let output = loaded.host.call(function, input).map_err(|err| match err {
            WapcError::GuestFailure(message) => TransportError::Guest {
                function: function.to_string(),
                message,
            },
            WapcError::Trap(message) => TransportError::Trap {
                function: function.to_string(),
                message,
            },
            WapcError::Protocol { import, message } => {
                warn!(function, import, "guest instance poisoned by waPC protocol violation");
                loaded.poisoned = Some(import.to_string());
                TransportError::Trap {
                    function: import.to_string(),
                    message,
                }
            }
            WapcError::TooLarge { what, len } => TransportError::TooLarge {
                what: what.to_string(),
                len,
            },
            WapcError::Host(err) => err,
        })?;

        trace!(function, output = %preview(&output), "waPC output");
        Ok(output)
    }

    fn close(&mut self) {
        if let Lifecycle::Instantiated(_) = self.lifecycle {
            debug!("waPC guest closed");
        }
        self.lifecycle = Lifecycle::Closed;
    }

    fn state(&self) -> InvokerState {
        self.lifecycle.state()
    }
}
