//! WAT guests for unit tests.
//!
//! The allocators are bump allocators that count calls in exported
//! `alloc_count` / `free_count` globals.

pub const BUMP_ALLOCATOR: &str = r#"
(module
  (memory (export "memory") 1)
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

  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (local $out i32)
    (local.set $out (call $malloc (local.get $len)))
    (memory.copy (local.get $out) (local.get $ptr) (local.get $len))
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $out)) (i64.const 32))
      (i64.extend_i32_u (local.get $len))))

  (func (export "null_result") (param i32 i32) (result i64)
    (i64.const 0))

  (func (export "trap") (param i32 i32) (result i64)
    unreachable)

  (func (export "spin") (param i32 i32) (result i64)
    (loop $forever (br $forever))
    unreachable)

  (func (export "wrong_shape") (param i32 i32) (result i32)
    (i32.const 1)))
"#;

pub const WIDE_ALLOCATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "malloc") (param i64) (result i64)
    (i64.const 2048))
  (func (export "free") (param i64)))
"#;

pub const NULL_ALLOCATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "malloc") (param i32) (result i32)
    (i32.const 0))
  (func (export "free") (param i32))
  (func (export "echo") (param i32 i32) (result i64)
    (i64.const 0)))
"#;

pub const TRAPPING_ALLOCATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "malloc") (param i32) (result i32)
    unreachable)
  (func (export "free") (param i32)
    unreachable)
  (func (export "echo") (param i32 i32) (result i64)
    (i64.const 0)))
"#;

/// Hands out the last byte of memory for every request, so writes of more
/// than one byte fall off the end.
pub const EDGE_ALLOCATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (global $allocs (export "alloc_count") (mut i32) (i32.const 0))
  (global $frees (export "free_count") (mut i32) (i32.const 0))
  (func (export "malloc") (param i32) (result i32)
    (global.set $allocs (i32.add (global.get $allocs) (i32.const 1)))
    (i32.const 65535))
  (func (export "free") (param i32)
    (global.set $frees (i32.add (global.get $frees) (i32.const 1))))
  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len)))))
"#;

/// Allocates normally but traps on release.
pub const TRAPPING_DEALLOCATOR: &str = r#"
(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (func (export "malloc") (param $size i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $size)))
    (local.get $ptr))
  (func (export "free") (param i32)
    unreachable)
  (func (export "echo") (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len)))))
"#;

/// waPC guest answering `echo` with its payload and failing `fail`.
pub const WAPC_ECHO: &str = r#"
(module
  (import "wapc" "__guest_request" (func $guest_request (param i32 i32)))
  (import "wapc" "__guest_response" (func $guest_response (param i32 i32)))
  (import "wapc" "__guest_error" (func $guest_error (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 16) "echo")
  (data (i32.const 32) "no such operation")

  (func (export "__guest_call") (param $op_len i32) (param $payload_len i32) (result i32)
    ;; operation name at 256, payload right after it
    (call $guest_request (i32.const 256) (i32.add (i32.const 256) (local.get $op_len)))
    (if (result i32)
      (i32.and
        (i32.eq (local.get $op_len) (i32.const 4))
        (i32.eq (i32.load (i32.const 256)) (i32.load (i32.const 16))))
      (then
        (call $guest_response
          (i32.add (i32.const 256) (local.get $op_len))
          (local.get $payload_len))
        (i32.const 1))
      (else
        (call $guest_error (i32.const 32) (i32.const 17))
        (i32.const 0)))))
"#;

/// waPC guest that points `__guest_response` past the end of its memory.
pub const WAPC_STRAY_RESPONSE: &str = r#"
(module
  (import "wapc" "__guest_response" (func $guest_response (param i32 i32)))
  (memory (export "memory") 1)
  (func (export "__guest_call") (param i32 i32) (result i32)
    (call $guest_response (i32.const 65535) (i32.const 16))
    (i32.const 1)))
"#;
