//! Guest runtime and the invoker contract.
//!
//! Guest modules are compiled and executed by wasmtime. This module owns the
//! engine configuration, the per-store host state, and the [`Invoker`]
//! contract shared by the two transports:
//!
//! - [`raw_abi::RawAbiInvoker`] moves bytes through guest memory itself,
//!   using the guest's exported allocator.
//! - [`host_call::HostCallInvoker`] forwards calls to a [`wapc::WapcHost`],
//!   which lets the guest pull its input and push its output through host
//!   imports.

pub mod host_call;
pub mod memory;
pub mod raw_abi;
pub mod wapc;

#[cfg(test)]
pub(crate) mod test_guests;

pub use host_call::HostCallInvoker;
pub use memory::{GuestPtr, MemoryBridge, MemoryView};
pub use raw_abi::RawAbiInvoker;
pub use wapc::{WapcError, WapcHost};

use crate::error::TransportError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use wasmtime::{Engine, Instance, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

// ---------------------------------------------------------------------------
// Invoker contract
// ---------------------------------------------------------------------------

/// Lifecycle of an invoker's guest instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokerState {
    /// No module loaded yet.
    Uninitialized,
    /// Module loaded and its required exports validated.
    Instantiated,
    /// Instance released; no further calls are possible.
    Closed,
}

impl fmt::Display for InvokerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvokerState::Uninitialized => "uninitialized",
            InvokerState::Instantiated => "instantiated",
            InvokerState::Closed => "closed",
        })
    }
}

/// Delivers wire bytes to a guest function and returns its wire bytes.
///
/// Implementations are not internally synchronised: one instance serves one
/// caller at a time. Share an invoker between bridges with [`share`].
pub trait Invoker: Send {
    /// Call `function` with `input` and return the guest's output bytes.
    ///
    /// Outside [`InvokerState::Instantiated`] this fails immediately with
    /// [`TransportError::NotInstantiated`] and does no guest work.
    fn run(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Release the guest instance. Calling it again is a no-op.
    fn close(&mut self);

    fn state(&self) -> InvokerState;
}

/// An invoker shared by every function bridge bound to the same instance.
pub type SharedInvoker = Arc<Mutex<dyn Invoker>>;

/// Wrap an invoker for sharing; the mutex serialises calls on the instance.
pub fn share<I: Invoker + 'static>(invoker: I) -> SharedInvoker {
    Arc::new(Mutex::new(invoker))
}

/// Instance slot of a transport, following [`InvokerState`].
pub(crate) enum Lifecycle<L> {
    Uninitialized,
    Instantiated(L),
    Closed,
}

impl<L> Lifecycle<L> {
    pub(crate) fn state(&self) -> InvokerState {
        match self {
            Lifecycle::Uninitialized => InvokerState::Uninitialized,
            Lifecycle::Instantiated(_) => InvokerState::Instantiated,
            Lifecycle::Closed => InvokerState::Closed,
        }
    }

    /// The loaded instance, or the fail-fast error for every other state.
    pub(crate) fn loaded_mut(&mut self) -> Result<&mut L, TransportError> {
        match self {
            Lifecycle::Instantiated(loaded) => Ok(loaded),
            other => Err(TransportError::NotInstantiated(other.state())),
        }
    }

    /// Loading is only valid once, from `Uninitialized`.
    pub(crate) fn check_loadable(&self) -> Result<(), TransportError> {
        match self {
            Lifecycle::Uninitialized => Ok(()),
            other => Err(TransportError::Instantiate(format!(
                "invoker is already {}",
                other.state()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Names of the guest exports the raw-ABI transport relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiConfig {
    pub alloc: String,
    pub dealloc: String,
    pub memory: String,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            alloc: "malloc".to_string(),
            dealloc: "free".to_string(),
            memory: "memory".to_string(),
        }
    }
}

/// Engine and store settings applied to every guest instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Fuel granted before each call (and before initialisation). `None`
    /// disables metering.
    pub fuel: Option<u64>,
    /// Upper bound on a guest's linear memory, in bytes.
    pub max_memory_bytes: Option<usize>,
    /// Link WASI preview1 imports.
    pub wasi: bool,
    /// Give WASI guests the host's stdin/stdout/stderr.
    pub inherit_stdio: bool,
    pub abi: AbiConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fuel: None,
            max_memory_bytes: None,
            wasi: true,
            inherit_stdio: true,
            abi: AbiConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = Some(fuel);
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    pub fn with_wasi(mut self, enabled: bool) -> Self {
        self.wasi = enabled;
        self
    }

    pub fn with_inherit_stdio(mut self, enabled: bool) -> Self {
        self.inherit_stdio = enabled;
        self
    }

    pub fn with_abi(mut self, abi: AbiConfig) -> Self {
        self.abi = abi;
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Data attached to every guest store.
pub struct HostState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
    /// Name of the guest's memory export, for host imports that touch it.
    pub(crate) memory_export: String,
    /// waPC request/response buffers for the call in flight.
    pub(crate) exchange: wapc::Exchange,
}

/// A wasmtime engine configured for guest calls. Cheap to clone.
#[derive(Clone)]
pub struct GuestRuntime {
    engine: Engine,
    config: RuntimeConfig,
}

impl GuestRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self, TransportError> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.consume_fuel(config.fuel.is_some());
        let engine = Engine::new(&engine_config).map_err(|e| TransportError::Compile(describe(&e)))?;
        Ok(Self { engine, config })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile a guest from binary WebAssembly or WAT text.
    pub fn compile(&self, wasm: impl AsRef<[u8]>) -> Result<Module, TransportError> {
        Module::new(&self.engine, wasm).map_err(|e| TransportError::Compile(describe(&e)))
    }

    pub(crate) fn new_store(&self) -> Result<Store<HostState>, TransportError> {
        let mut wasi = WasiCtxBuilder::new();
        if self.config.inherit_stdio {
            wasi.inherit_stdio();
        }

        let mut limits = StoreLimitsBuilder::new();
        if let Some(bytes) = self.config.max_memory_bytes {
            limits = limits.memory_size(bytes);
        }

        let state = HostState {
            wasi: wasi.build_p1(),
            limits: limits.build(),
            memory_export: self.config.abi.memory.clone(),
            exchange: wapc::Exchange::default(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        self.refuel(&mut store)?;
        Ok(store)
    }

    pub(crate) fn linker(&self) -> Result<Linker<HostState>, TransportError> {
        let mut linker = Linker::new(&self.engine);
        if self.config.wasi {
            wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut HostState| &mut state.wasi)
                .map_err(|e| TransportError::Instantiate(describe(&e)))?;
        }
        Ok(linker)
    }

    /// Reset the fuel budget ahead of a call.
    pub(crate) fn refuel(&self, store: &mut Store<HostState>) -> Result<(), TransportError> {
        if let Some(fuel) = self.config.fuel {
            store
                .set_fuel(fuel)
                .map_err(|e| TransportError::Instantiate(describe(&e)))?;
        }
        Ok(())
    }

    /// Run the guest's WASI entry point (`_initialize` or `_start`) and then
    /// each of `hooks` that the guest exports.
    ///
    /// A `proc_exit(0)` from any of them counts as success.
    pub(crate) fn initialize(
        &self,
        store: &mut Store<HostState>,
        instance: &Instance,
        hooks: &[&str],
    ) -> Result<(), TransportError> {
        let entry = ["_initialize", "_start"]
            .into_iter()
            .find(|name| instance.get_func(&mut *store, name).is_some());

        for name in entry.into_iter().chain(hooks.iter().copied()) {
            let Some(func) = instance.get_func(&mut *store, name) else {
                continue;
            };
            let func = func
                .typed::<(), ()>(&*store)
                .map_err(|e| TransportError::UnsupportedSignature {
                    name: name.to_string(),
                    reason: describe(&e),
                })?;
            match func.call(&mut *store, ()) {
                Ok(()) => debug!(name, "guest initialised"),
                Err(err) if is_clean_exit(&err) => debug!(name, "guest exited cleanly during initialisation"),
                Err(err) => {
                    return Err(TransportError::Instantiate(format!(
                        "`{name}` failed: {}",
                        describe(&err)
                    )))
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Human-readable cause of a wasmtime failure: the trap code when the guest
/// trapped, otherwise the innermost error.
pub(crate) fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<Trap>() {
        Some(trap) => trap.to_string(),
        None => err.root_cause().to_string(),
    }
}

fn is_clean_exit(err: &anyhow::Error) -> bool {
    err.downcast_ref::<I32Exit>().is_some_and(|exit| exit.0 == 0)
}

const PREVIEW_BYTES: usize = 32;

/// Hex preview of a wire buffer for trace output.
pub(crate) fn preview(bytes: &[u8]) -> String {
    if bytes.len() <= PREVIEW_BYTES {
        return hex::encode(bytes);
    }
    format!(
        "{}.. (+{} bytes)",
        hex::encode(&bytes[..PREVIEW_BYTES]),
        bytes.len() - PREVIEW_BYTES
    )
}
