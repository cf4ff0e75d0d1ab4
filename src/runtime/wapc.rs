//! waPC call dispatch.
//!
//! [`WapcHost`] owns one guest instance speaking the waPC protocol and turns
//! an `(operation, payload)` pair into the guest's answer. The guest owns all
//! of its memory management. The host only announces sizes through
//! `__guest_call(operation_len, payload_len)`; the guest then allocates
//! buffers itself and pulls the operation name and payload in through the
//! `__guest_request` import, and pushes its answer back through
//! `__guest_response` or `__guest_error`.
//!
//! Guest-to-host calls are not supported: `__host_call` always fails.

use super::memory::MemoryView;
use super::{describe, GuestRuntime, HostState};
use crate::error::TransportError;
use tracing::{debug, info};
use wasmtime::{Caller, Extern, Instance, Linker, Store, TypedFunc};

const MODULE: &str = "wapc";
const GUEST_CALL: &str = "__guest_call";
const INIT: &str = "wapc_init";
pub(crate) const HOST_CALLS_UNSUPPORTED: &str = "host calls are not supported";

/// Outcome of a failed [`WapcHost::call`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WapcError {
    /// The guest answered with `__guest_error` or a zero status.
    #[error("Guest call failed: {0}")]
    GuestFailure(String),
    /// The guest trapped or ran out of fuel.
    #[error("Guest trapped: {0}")]
    Trap(String),
    /// The guest handed a host import buffers it could not use. The guest's
    /// own bookkeeping is suspect afterwards.
    #[error("Guest misused `{import}`: {message}")]
    Protocol { import: &'static str, message: String },
    #[error("{what} of {len} bytes exceeds the waPC length limit")]
    TooLarge { what: &'static str, len: usize },
    #[error(transparent)]
    Host(#[from] TransportError),
}

/// Raised by host imports; surfaces from the guest call unchanged.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct ProtocolViolation {
    import: &'static str,
    message: String,
}

fn violation(import: &'static str, err: impl ToString) -> anyhow::Error {
    ProtocolViolation {
        import,
        message: err.to_string(),
    }
    .into()
}

/// Buffers for the call in flight, held in the store.
#[derive(Debug, Default)]
pub(crate) struct Exchange {
    operation: Vec<u8>,
    payload: Vec<u8>,
    response: Option<Vec<u8>>,
    guest_error: Option<String>,
    host_error: Option<String>,
}

impl Exchange {
    fn request(operation: &str, payload: &[u8]) -> Self {
        Self {
            operation: operation.as_bytes().to_vec(),
            payload: payload.to_vec(),
            ..Self::default()
        }
    }
}

/// A length as the guest sees it.
fn wire_len(what: &'static str, len: usize) -> Result<i32, WapcError> {
    i32::try_from(len).map_err(|_| WapcError::TooLarge { what, len })
}

// ---------------------------------------------------------------------------
// Host imports
// ---------------------------------------------------------------------------

fn guest_memory(caller: &mut Caller<'_, HostState>, import: &'static str) -> anyhow::Result<MemoryView> {
    let name = caller.data().memory_export.clone();
    match caller.get_export(&name) {
        Some(Extern::Memory(memory)) => Ok(MemoryView::new(memory)),
        _ => Err(violation(import, format!("guest does not export memory `{name}`"))),
    }
}

fn read_bytes(caller: &mut Caller<'_, HostState>, import: &'static str, ptr: i32, len: i32) -> anyhow::Result<Vec<u8>> {
    let memory = guest_memory(caller, import)?;
    memory
        .read(&*caller, ptr as u32, len as u32)
        .map_err(|e| violation(import, e))
}

fn write_bytes(caller: &mut Caller<'_, HostState>, import: &'static str, ptr: i32, bytes: &[u8]) -> anyhow::Result<()> {
    let memory = guest_memory(caller, import)?;
    memory
        .write(&mut *caller, ptr as u32, bytes)
        .map_err(|e| violation(import, e))
}

fn read_string(caller: &mut Caller<'_, HostState>, import: &'static str, ptr: i32, len: i32) -> anyhow::Result<String> {
    let bytes = read_bytes(caller, import, ptr, len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn link_imports(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        MODULE,
        "__guest_request",
        |mut caller: Caller<'_, HostState>, op_ptr: i32, ptr: i32| -> anyhow::Result<()> {
            let exchange = &caller.data().exchange;
            let (operation, payload) = (exchange.operation.clone(), exchange.payload.clone());
            write_bytes(&mut caller, "__guest_request", op_ptr, &operation)?;
            write_bytes(&mut caller, "__guest_request", ptr, &payload)
        },
    )?;

    linker.func_wrap(
        MODULE,
        "__guest_response",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = read_bytes(&mut caller, "__guest_response", ptr, len)?;
            caller.data_mut().exchange.response = Some(bytes);
            Ok(())
        },
    )?;

    linker.func_wrap(
        MODULE,
        "__guest_error",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let message = read_string(&mut caller, "__guest_error", ptr, len)?;
            caller.data_mut().exchange.guest_error = Some(message);
            Ok(())
        },
    )?;

    linker.func_wrap(
        MODULE,
        "__host_call",
        |mut caller: Caller<'_, HostState>,
         _binding_ptr: i32,
         _binding_len: i32,
         _namespace_ptr: i32,
         _namespace_len: i32,
         operation_ptr: i32,
         operation_len: i32,
         _ptr: i32,
         _len: i32|
         -> anyhow::Result<i32> {
            let operation = read_string(&mut caller, "__host_call", operation_ptr, operation_len)?;
            debug!(operation, "rejected guest-to-host call");
            caller.data_mut().exchange.host_error = Some(HOST_CALLS_UNSUPPORTED.to_string());
            Ok(0)
        },
    )?;

    linker.func_wrap(
        MODULE,
        "__host_response_len",
        |_caller: Caller<'_, HostState>| -> i32 { 0 },
    )?;

    linker.func_wrap(
        MODULE,
        "__host_response",
        |_caller: Caller<'_, HostState>, _ptr: i32| {},
    )?;

    linker.func_wrap(
        MODULE,
        "__host_error_len",
        |caller: Caller<'_, HostState>| -> i32 {
            caller
                .data()
                .exchange
                .host_error
                .as_ref()
                .map_or(0, |e| i32::try_from(e.len()).unwrap_or(i32::MAX))
        },
    )?;

    linker.func_wrap(
        MODULE,
        "__host_error",
        |mut caller: Caller<'_, HostState>, ptr: i32| -> anyhow::Result<()> {
            let Some(message) = caller.data().exchange.host_error.clone() else {
                return Ok(());
            };
            write_bytes(&mut caller, "__host_error", ptr, message.as_bytes())
        },
    )?;

    linker.func_wrap(
        MODULE,
        "__console_log",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let line = read_string(&mut caller, "__console_log", ptr, len)?;
            info!(target: "guestcall::guest", "{line}");
            Ok(())
        },
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// A waPC guest instance ready to take calls.
pub struct WapcHost {
    runtime: GuestRuntime,
    store: Store<HostState>,
    guest_call: TypedFunc<(i32, i32), i32>,
}

impl WapcHost {
    /// Instantiate the guest, run its initialisers (`_start`, then
    /// `wapc_init`) and validate `__guest_call`.
    pub fn new(runtime: GuestRuntime, wasm: impl AsRef<[u8]>) -> Result<Self, TransportError> {
        let module = runtime.compile(wasm)?;
        let mut linker = runtime.linker()?;
        link_imports(&mut linker).map_err(|e| TransportError::Instantiate(describe(&e)))?;
        let mut store = runtime.new_store()?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| TransportError::Instantiate(describe(&e)))?;
        runtime.initialize(&mut store, &instance, &[INIT])?;
        let guest_call = resolve_guest_call(&mut store, &instance)?;

        Ok(Self {
            runtime,
            store,
            guest_call,
        })
    }

    /// Hand `payload` to the guest's `operation` and collect its response.
    ///
    /// A successful call with no `__guest_response` yields an empty payload.
    pub fn call(&mut self, operation: &str, payload: &[u8]) -> Result<Vec<u8>, WapcError> {
        let operation_len = wire_len("Operation name", operation.len())?;
        let payload_len = wire_len("Payload", payload.len())?;
        self.runtime.refuel(&mut self.store)?;

        self.store.data_mut().exchange = Exchange::request(operation, payload);
        let outcome = self.guest_call.call(&mut self.store, (operation_len, payload_len));
        let exchange = std::mem::take(&mut self.store.data_mut().exchange);

        let status = outcome.map_err(|err| match err.downcast_ref::<ProtocolViolation>() {
            Some(v) => WapcError::Protocol {
                import: v.import,
                message: v.message.clone(),
            },
            None => WapcError::Trap(describe(&err)),
        })?;
        if status != 1 {
            return Err(WapcError::GuestFailure(
                exchange
                    .guest_error
                    .unwrap_or_else(|| "guest reported failure without a message".to_string()),
            ));
        }
        Ok(exchange.response.unwrap_or_default())
    }
}

fn resolve_guest_call(
    store: &mut Store<HostState>,
    instance: &Instance,
) -> Result<TypedFunc<(i32, i32), i32>, TransportError> {
    let func = instance
        .get_func(&mut *store, GUEST_CALL)
        .ok_or_else(|| TransportError::MissingExport {
            name: GUEST_CALL.to_string(),
            kind: "function",
        })?;
    func.typed::<(i32, i32), i32>(&*store)
        .map_err(|e| TransportError::UnsupportedSignature {
            name: GUEST_CALL.to_string(),
            reason: describe(&e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{test_guests, RuntimeConfig};

    fn host(wat: &str) -> WapcHost {
        let runtime = GuestRuntime::new(RuntimeConfig::default().with_wasi(false)).unwrap();
        WapcHost::new(runtime, wat).unwrap()
    }

    #[test]
    fn lengths_must_fit_i32() {
        assert_eq!(wire_len("Payload", 5), Ok(5));
        assert_eq!(wire_len("Payload", i32::MAX as usize), Ok(i32::MAX));
        assert_eq!(
            wire_len("Payload", i32::MAX as usize + 1),
            Err(WapcError::TooLarge {
                what: "Payload",
                len: i32::MAX as usize + 1
            })
        );
    }

    #[test]
    fn echo_and_failure() {
        let mut host = host(test_guests::WAPC_ECHO);
        assert_eq!(host.call("echo", b"\x01\x02").unwrap(), b"\x01\x02");
        assert_eq!(
            host.call("nope", b"").unwrap_err(),
            WapcError::GuestFailure("no such operation".to_string())
        );
    }

    #[test]
    fn out_of_bounds_response_is_a_protocol_error() {
        let mut host = host(test_guests::WAPC_STRAY_RESPONSE);
        match host.call("any", b"").unwrap_err() {
            WapcError::Protocol { import, message } => {
                assert_eq!(import, "__guest_response");
                assert!(message.contains("out of bounds"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_trap_is_not_a_protocol_error() {
        let mut host = host(
            r#"(module
                 (memory (export "memory") 1)
                 (func (export "__guest_call") (param i32 i32) (result i32) unreachable))"#,
        );
        assert!(matches!(host.call("boom", b""), Err(WapcError::Trap(_))));
    }
}
