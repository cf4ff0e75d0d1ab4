//! Memory bridge between the host and a guest's linear memory.
//!
//! No raw pointer leaves this module: guest offsets are plain `u32`s, and
//! every read and write is validated against the memory's current size
//! before it touches a byte. Allocation and release go through the guest's
//! own exported allocator.

use super::{describe, AbiConfig};
use crate::error::TransportError;
use std::ops::Range;
use tracing::{trace, warn};
use wasmtime::{AsContext, AsContextMut, Func, Instance, Memory, Val, ValType};

// ---------------------------------------------------------------------------
// Packed pointer words
// ---------------------------------------------------------------------------

/// A guest offset and length, as packed into one 64-bit return word
/// (pointer in the high 32 bits, length in the low 32 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestPtr {
    pub offset: u32,
    pub len: u32,
}

impl GuestPtr {
    pub const fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }

    /// Offset zero is never a valid allocation.
    pub const fn is_null(&self) -> bool {
        self.offset == 0
    }

    pub const fn pack(self) -> u64 {
        ((self.offset as u64) << 32) | self.len as u64
    }

    pub const fn unpack(word: u64) -> Self {
        Self {
            offset: (word >> 32) as u32,
            len: word as u32,
        }
    }
}

// ---------------------------------------------------------------------------
// Bounds-checked view
// ---------------------------------------------------------------------------

/// Bounds-checked access to one guest memory.
#[derive(Debug, Clone, Copy)]
pub struct MemoryView {
    memory: Memory,
}

impl MemoryView {
    pub fn new(memory: Memory) -> Self {
        Self { memory }
    }

    /// Current size in bytes.
    pub fn size(&self, store: impl AsContext) -> usize {
        self.memory.data_size(store)
    }

    fn check_bounds(&self, store: impl AsContext, offset: u32, len: usize) -> Result<Range<usize>, TransportError> {
        let size = self.size(store);
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start..end),
            _ => Err(TransportError::OutOfBounds {
                offset,
                len: len as u64,
                size,
            }),
        }
    }

    pub fn read(&self, store: impl AsContext, offset: u32, len: u32) -> Result<Vec<u8>, TransportError> {
        let range = self.check_bounds(&store, offset, len as usize)?;
        Ok(self.memory.data(&store)[range].to_vec())
    }

    pub fn write(&self, mut store: impl AsContextMut, offset: u32, bytes: &[u8]) -> Result<(), TransportError> {
        let range = self.check_bounds(&store, offset, bytes.len())?;
        self.memory.data_mut(&mut store)[range].copy_from_slice(bytes);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Allocator exports
// ---------------------------------------------------------------------------

/// Width of the pointer an allocator export takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PtrWidth {
    I32,
    I64,
}

impl PtrWidth {
    fn of(ty: &ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(PtrWidth::I32),
            ValType::I64 => Some(PtrWidth::I64),
            _ => None,
        }
    }

    fn val(self, v: u32) -> Val {
        match self {
            PtrWidth::I32 => Val::I32(v as i32),
            PtrWidth::I64 => Val::I64(v as i64),
        }
    }
}

/// A guest pointer returned as either width; `None` if it does not fit the
/// 32-bit address space.
fn pointer_of(val: &Val) -> Option<u32> {
    match val {
        Val::I32(v) => Some(*v as u32),
        Val::I64(v) => u32::try_from(*v).ok(),
        _ => None,
    }
}

pub(crate) fn render_types(types: impl Iterator<Item = ValType>) -> String {
    let types: Vec<String> = types.map(|t| t.to_string()).collect();
    format!("({})", types.join(", "))
}

struct AllocatorExport {
    name: String,
    func: Func,
    param: PtrWidth,
    results: usize,
}

impl AllocatorExport {
    fn resolve(
        mut store: impl AsContextMut,
        instance: &Instance,
        name: &str,
        returns_pointer: bool,
    ) -> Result<Self, TransportError> {
        let func = instance
            .get_func(&mut store, name)
            .ok_or_else(|| TransportError::MissingExport {
                name: name.to_string(),
                kind: "function",
            })?;

        let ty = func.ty(&store);
        let unsupported = |reason: String| TransportError::UnsupportedSignature {
            name: name.to_string(),
            reason,
        };

        let params: Vec<ValType> = ty.params().collect();
        let param = match params.as_slice() {
            [p] => PtrWidth::of(p),
            _ => None,
        }
        .ok_or_else(|| unsupported(format!("expected one i32 or i64 parameter, found {}", render_types(ty.params()))))?;

        let results: Vec<ValType> = ty.results().collect();
        if returns_pointer && !matches!(results.as_slice(), [r] if PtrWidth::of(r).is_some()) {
            return Err(unsupported(format!(
                "expected one i32 or i64 result, found {}",
                render_types(ty.results())
            )));
        }

        Ok(Self {
            name: name.to_string(),
            func,
            param,
            results: results.len(),
        })
    }

    fn call(&self, store: impl AsContextMut, arg: u32) -> Result<Vec<Val>, TransportError> {
        let mut results = vec![Val::I32(0); self.results];
        self.func
            .call(store, &[self.param.val(arg)], &mut results)
            .map_err(|err| TransportError::Trap {
                function: self.name.clone(),
                message: describe(&err),
            })?;
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Guest memory plus the guest's allocator and deallocator.
pub struct MemoryBridge {
    view: MemoryView,
    alloc: AllocatorExport,
    dealloc: AllocatorExport,
}

impl MemoryBridge {
    /// Look up and validate the memory, allocator and deallocator exports.
    pub fn resolve(mut store: impl AsContextMut, instance: &Instance, abi: &AbiConfig) -> Result<Self, TransportError> {
        let memory = instance
            .get_memory(&mut store, &abi.memory)
            .ok_or_else(|| TransportError::MissingExport {
                name: abi.memory.clone(),
                kind: "memory",
            })?;
        let alloc = AllocatorExport::resolve(&mut store, instance, &abi.alloc, true)?;
        let dealloc = AllocatorExport::resolve(&mut store, instance, &abi.dealloc, false)?;
        Ok(Self {
            view: MemoryView::new(memory),
            alloc,
            dealloc,
        })
    }

    pub fn alloc_name(&self) -> &str {
        &self.alloc.name
    }

    pub fn dealloc_name(&self) -> &str {
        &self.dealloc.name
    }

    /// Ask the guest for `size` bytes.
    ///
    /// # Errors
    /// - `Trap` if the allocator faults
    /// - `ResultShape` if the returned pointer does not fit 32 bits
    /// - `NullPointer` if the allocator returns offset zero
    pub fn allocate(&self, store: impl AsContextMut, size: u32) -> Result<u32, TransportError> {
        let results = self.alloc.call(store, size)?;
        let returned = &results[0];
        let offset = pointer_of(returned).ok_or_else(|| TransportError::ResultShape {
            function: self.alloc.name.clone(),
            expected: "a 32-bit pointer".to_string(),
            actual: format!("{returned:?}"),
        })?;
        if offset == 0 {
            return Err(TransportError::NullPointer {
                what: format!("Allocator `{}`", self.alloc.name),
            });
        }
        trace!(size, offset, "guest allocation");
        Ok(offset)
    }

    pub fn write(&self, store: impl AsContextMut, offset: u32, bytes: &[u8]) -> Result<(), TransportError> {
        self.view.write(store, offset, bytes)
    }

    pub fn read(&self, store: impl AsContext, offset: u32, len: u32) -> Result<Vec<u8>, TransportError> {
        self.view.read(store, offset, len)
    }

    /// Hand `offset` back to the guest's deallocator.
    ///
    /// A failure is logged here; callers only inspect it to decide whether
    /// the instance is still usable, never to fail the call.
    pub fn release(&self, store: impl AsContextMut, offset: u32) -> Result<(), TransportError> {
        match self.dealloc.call(store, offset) {
            Ok(_) => {
                trace!(offset, "guest release");
                Ok(())
            }
            Err(err) => {
                warn!(offset, error = %err, "failed to release guest allocation");
                Err(err)
            }
        }
    }
}
