//! Guest modules and helpers shared between integration tests
#![allow(dead_code)]

use guestcall::runtime::{GuestRuntime, RawAbiInvoker, RuntimeConfig};

/// Raw-ABI guest speaking the wire format for small values.
///
/// The allocator is a bump allocator; `alloc_count` and `free_count` count
/// calls so tests can check that every allocation is released once.
///
/// - `greet(string) -> string`: `"hello, " + name` (names under 25 bytes)
/// - `add(int, int) -> int`: sum of two positive fixints
/// - `count(array<string>) -> int`: element count of a fixarray
/// - `echo(..)`: output = input
/// - `null_result`, `out_of_bounds`, `trap`, `spin`: failure modes
pub const RAW_GUEST: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 16) "hello, ")
  (global $heap (mut i32) (i32.const 1024))
  (global $allocs (export "alloc_count") (mut i32) (i32.const 0))
  (global $frees (export "free_count") (mut i32) (i32.const 0))

  (func $malloc (export "malloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (global.set $allocs (i32.add (global.get $allocs) (i32.const 1)))
    (local.get $ptr))

  (func (export "free") (param i32)
    (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

  (func $pack (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len))))

  (func (export "greet") (param $ptr i32) (param $len i32) (result i64)
    (local $n i32) (local $out i32)
    (local.set $n (i32.and (i32.load8_u (local.get $ptr)) (i32.const 0x1f)))
    (local.set $out (call $malloc (i32.add (local.get $n) (i32.const 8))))
    (i32.store8 (local.get $out) (i32.or (i32.const 0xa0) (i32.add (local.get $n) (i32.const 7))))
    (memory.copy (i32.add (local.get $out) (i32.const 1)) (i32.const 16) (i32.const 7))
    (memory.copy (i32.add (local.get $out) (i32.const 8)) (i32.add (local.get $ptr) (i32.const 1)) (local.get $n))
    (call $pack (local.get $out) (i32.add (local.get $n) (i32.const 8))))

  (func (export "add") (param $ptr i32) (param $len i32) (result i64)
    (local $out i32)
    (local.set $out (call $malloc (i32.const 1)))
    (i32.store8 (local.get $out)
      (i32.add (i32.load8_u (local.get $ptr)) (i32.load8_u offset=1 (local.get $ptr))))
    (call $pack (local.get $out) (i32.const 1)))

  (func (export "count") (param $ptr i32) (param $len i32) (result i64)
    (local $out i32)
    (local.set $out (call $malloc (i32.const 1)))
    (i32.store8 (local.get $out) (i32.and (i32.load8_u (local.get $ptr)) (i32.const 0x0f)))
    (call $pack (local.get $out) (i32.const 1)))

  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (local $out i32)
    (local.set $out (call $malloc (local.get $len)))
    (memory.copy (local.get $out) (local.get $ptr) (local.get $len))
    (call $pack (local.get $out) (local.get $len)))

  (func (export "null_result") (param i32 i32) (result i64)
    (i64.const 0))

  (func (export "out_of_bounds") (param i32 i32) (result i64)
    (call $pack (i32.const 0xffff0000) (i32.const 16)))

  (func (export "trap") (param i32 i32) (result i64)
    unreachable)

  (func (export "spin") (param i32 i32) (result i64)
    (loop $forever (br $forever))
    unreachable))
"#;

/// waPC guest with a `greet` operation answering `"hello, " + name`.
/// Every other operation fails with "unknown operation".
pub const WAPC_GUEST: &str = r#"
(module
  (import "wapc" "__guest_request" (func $request (param i32 i32)))
  (import "wapc" "__guest_response" (func $response (param i32 i32)))
  (import "wapc" "__guest_error" (func $error (param i32 i32)))
  (import "wapc" "__console_log" (func $log (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "hello, ")
  (data (i32.const 32) "greet")
  (data (i32.const 48) "unknown operation")
  (data (i32.const 80) "greeting")

  (func (export "__guest_call") (param $op_len i32) (param $len i32) (result i32)
    (local $n i32)
    ;; operation at 256, payload right after it
    (call $request (i32.const 256) (i32.add (i32.const 256) (local.get $op_len)))
    (if (i32.eqz
          (i32.and
            (i32.eq (local.get $op_len) (i32.const 5))
            (i32.and
              (i32.eq (i32.load (i32.const 256)) (i32.load (i32.const 32)))
              (i32.eq (i32.load8_u (i32.const 260)) (i32.load8_u (i32.const 36))))))
      (then
        (call $error (i32.const 48) (i32.const 17))
        (return (i32.const 0))))
    (call $log (i32.const 80) (i32.const 8))
    (local.set $n (i32.and (i32.load8_u (i32.const 261)) (i32.const 0x1f)))
    (i32.store8 (i32.const 512) (i32.or (i32.const 0xa0) (i32.add (local.get $n) (i32.const 7))))
    (memory.copy (i32.const 513) (i32.const 16) (i32.const 7))
    (memory.copy (i32.const 520) (i32.const 262) (local.get $n))
    (call $response (i32.const 512) (i32.add (local.get $n) (i32.const 8)))
    (i32.const 1)))
"#;

/// Declarations for the functions [`RAW_GUEST`] implements.
pub const DECLARATIONS: &str = r#"{
    "functions": [
        { "name": "greet", "parameters": ["string"], "returns": ["string"] },
        { "name": "add", "parameters": ["int", "int"], "returns": ["int"] },
        { "name": "count", "parameters": ["array<string>"], "returns": ["int"] },
        { "name": "null_result", "parameters": ["string"], "returns": ["string"] }
    ]
}"#;

pub fn runtime() -> GuestRuntime {
    GuestRuntime::new(RuntimeConfig::default().with_wasi(false)).expect("Failed to create runtime")
}

pub fn raw_invoker() -> RawAbiInvoker {
    RawAbiInvoker::instantiate(runtime(), RAW_GUEST).expect("Failed to instantiate guest")
}

/// `(alloc_count, free_count)` of a [`RAW_GUEST`] instance.
pub fn allocation_counts(invoker: &mut RawAbiInvoker) -> (i32, i32) {
    let allocs = invoker.guest_global("alloc_count").expect("alloc_count").unwrap_i32();
    let frees = invoker.guest_global("free_count").expect("free_count").unwrap_i32();
    (allocs, frees)
}
