//! Raw-ABI transport.
//!
//! The host drives the whole exchange through guest memory:
//!
//! 1. `malloc(len)` for the input and write the input bytes there
//! 2. call `function(ptr, len) -> i64`
//! 3. unpack the result word into `(ptr, len)` and read the output
//! 4. `free` the output and the input
//!
//! Every allocation obtained in step 1 or 3 is released exactly once, on
//! success and on every failure after it. A fault inside the allocator or
//! the deallocator leaves the guest heap in an unknown state, so the
//! instance is poisoned and later calls fail fast.

use super::memory::{render_types, GuestPtr, MemoryBridge};
use super::{describe, preview, GuestRuntime, HostState, Invoker, InvokerState, Lifecycle};
use crate::error::TransportError;
use tracing::{debug, trace, warn};
use wasmtime::{Func, Instance, Store, Val, ValType};

pub struct RawAbiInvoker {
    runtime: GuestRuntime,
    lifecycle: Lifecycle<Loaded>,
}

struct Loaded {
    store: Store<HostState>,
    instance: Instance,
    bridge: MemoryBridge,
    /// Per-call fuel budget, also granted to cleanup.
    fuel: Option<u64>,
    /// Name of the export whose fault made the instance unusable.
    poisoned: Option<String>,
}

impl RawAbiInvoker {
    /// An invoker with no module loaded yet.
    pub fn new(runtime: GuestRuntime) -> Self {
        Self {
            runtime,
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Compile and load `wasm` in one step.
    pub fn instantiate(runtime: GuestRuntime, wasm: impl AsRef<[u8]>) -> Result<Self, TransportError> {
        let mut invoker = Self::new(runtime);
        invoker.load(wasm)?;
        Ok(invoker)
    }

    /// Instantiate the guest and validate the memory and allocator exports.
    pub fn load(&mut self, wasm: impl AsRef<[u8]>) -> Result<(), TransportError> {
        self.lifecycle.check_loadable()?;

        let module = self.runtime.compile(wasm)?;
        let linker = self.runtime.linker()?;
        let mut store = self.runtime.new_store()?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| TransportError::Instantiate(describe(&e)))?;
        self.runtime.initialize(&mut store, &instance, &[])?;
        let bridge = MemoryBridge::resolve(&mut store, &instance, &self.runtime.config().abi)?;

        debug!(
            alloc = bridge.alloc_name(),
            dealloc = bridge.dealloc_name(),
            "raw-abi guest instantiated"
        );
        self.lifecycle = Lifecycle::Instantiated(Loaded {
            store,
            instance,
            bridge,
            fuel: self.runtime.config().fuel,
            poisoned: None,
        });
        Ok(())
    }

    /// Whether a fatal fault has made the instance unusable.
    pub fn is_poisoned(&self) -> bool {
        matches!(&self.lifecycle, Lifecycle::Instantiated(loaded) if loaded.poisoned.is_some())
    }

    /// Current value of an exported global, for inspecting guest state.
    pub fn guest_global(&mut self, name: &str) -> Option<Val> {
        let loaded = self.lifecycle.loaded_mut().ok()?;
        let global = loaded.instance.get_global(&mut loaded.store, name)?;
        Some(global.get(&mut loaded.store))
    }
}

impl Invoker for RawAbiInvoker {
    fn run(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, TransportError> {
        let loaded = self.lifecycle.loaded_mut()?;
        if let Some(export) = &loaded.poisoned {
            return Err(TransportError::Poisoned(export.clone()));
        }
        self.runtime.refuel(&mut loaded.store)?;

        debug!(function, input_len = input.len(), "raw-abi call");
        trace!(function, input = %preview(input), "raw-abi input");

        let func = loaded.guest_function(function)?;
        let output = loaded.call(function, func, input)?;

        trace!(function, output = %preview(&output), "raw-abi output");
        Ok(output)
    }

    fn close(&mut self) {
        if let Lifecycle::Instantiated(_) = self.lifecycle {
            debug!("raw-abi guest closed");
        }
        self.lifecycle = Lifecycle::Closed;
    }

    fn state(&self) -> InvokerState {
        self.lifecycle.state()
    }
}

impl Loaded {
    /// Resolve `function` and check it is `(i32, i32) -> i64`.
    fn guest_function(&mut self, function: &str) -> Result<Func, TransportError> {
        let func = self
            .instance
            .get_func(&mut self.store, function)
            .ok_or_else(|| TransportError::MissingExport {
                name: function.to_string(),
                kind: "function",
            })?;

        let ty = func.ty(&self.store);
        let params: Vec<ValType> = ty.params().collect();
        if !matches!(params.as_slice(), [ValType::I32, ValType::I32]) {
            return Err(TransportError::UnsupportedSignature {
                name: function.to_string(),
                reason: format!("expected parameters (i32, i32), found {}", render_types(ty.params())),
            });
        }
        let results: Vec<ValType> = ty.results().collect();
        if !matches!(results.as_slice(), [ValType::I64]) {
            return Err(TransportError::ResultShape {
                function: function.to_string(),
                expected: "one i64 word".to_string(),
                actual: render_types(ty.results()),
            });
        }
        Ok(func)
    }

    fn call(&mut self, function: &str, func: Func, input: &[u8]) -> Result<Vec<u8>, TransportError> {
        let len = u32::try_from(input.len()).map_err(|_| TransportError::TooLarge {
            what: "Input".to_string(),
            len: input.len(),
        })?;

        // Some allocators return null for a zero-byte request.
        let input_ptr = self.allocate(len.max(1))?;
        let outcome = self.call_with_input(function, func, GuestPtr::new(input_ptr, len), input);
        self.release(input_ptr);
        outcome
    }

    fn call_with_input(
        &mut self,
        function: &str,
        func: Func,
        arg: GuestPtr,
        input: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.bridge.write(&mut self.store, arg.offset, input)?;

        let mut results = [Val::I64(0)];
        func.call(
            &mut self.store,
            &[Val::I32(arg.offset as i32), Val::I32(arg.len as i32)],
            &mut results,
        )
        .map_err(|err| TransportError::Trap {
            function: function.to_string(),
            message: describe(&err),
        })?;

        let word = match results[0] {
            Val::I64(word) => word as u64,
            ref other => {
                return Err(TransportError::ResultShape {
                    function: function.to_string(),
                    expected: "one i64 word".to_string(),
                    actual: format!("{other:?}"),
                })
            }
        };
        let result = GuestPtr::unpack(word);
        if result.is_null() {
            return Err(TransportError::NullPointer {
                what: format!("Guest function `{function}`"),
            });
        }

        let output = self.bridge.read(&self.store, result.offset, result.len);
        self.release(result.offset);
        output
    }

    fn allocate(&mut self, size: u32) -> Result<u32, TransportError> {
        self.bridge.allocate(&mut self.store, size).map_err(|err| {
            if matches!(err, TransportError::Trap { .. }) {
                self.poisoned = Some(self.bridge.alloc_name().to_string());
            }
            err
        })
    }

    fn release(&mut self, offset: u32) {
        if self.poisoned.is_some() {
            return;
        }
        // A call that ran out of fuel must still be able to clean up.
        if let Some(fuel) = self.fuel {
            if let Err(err) = self.store.set_fuel(fuel) {
                warn!(error = %err, "failed to refuel guest for cleanup");
            }
        }
        if self.bridge.release(&mut self.store, offset).is_err() {
            warn!(
                dealloc = self.bridge.dealloc_name(),
                "guest instance poisoned by deallocator fault"
            );
            self.poisoned = Some(self.bridge.dealloc_name().to_string());
        }
    }
}
