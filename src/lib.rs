//! Typed calls into WebAssembly guest modules.
//!
//! guestcall lets a host call functions exported by a sandboxed WebAssembly
//! guest with structured values (integers, strings, arrays and objects)
//! instead of raw bytes. Values are encoded into a compact MessagePack wire
//! format directed by a shared type descriptor, moved into guest memory, and
//! the single result is decoded the same way.
//!
//! # Modules
//!
//! - [`schema`] -- Type descriptors and function signatures.
//! - [`codec`] -- Descriptor-directed encoder and decoder, and the structured-value capability set.
//! - [`runtime`] -- The wasmtime engine, guest memory bridge, and the raw-ABI and waPC transports.
//! - [`bridge`] -- Function bridges binding signatures to a transport, and the declaration loader.
//! - [`error`] -- Error taxonomy shared by every stage of a call.
//!
//! # Example
//!
//! Encode and decode without a guest:
//!
//! ```
//! use guestcall::codec::{self, Value};
//! use guestcall::schema::TypeDescriptor;
//!
//! let descriptor: TypeDescriptor = "object<string,array<string>>".parse().unwrap();
//! let value = Value::object([("a", Value::array(["x", "y"]))]);
//!
//! let bytes = codec::encode_to_vec(&value, &descriptor).unwrap();
//! assert_eq!(codec::decode(&bytes, &descriptor).unwrap(), value);
//! ```
//!
//! Call a guest through the raw ABI:
//!
//! ```no_run
//! use guestcall::bridge::{bind, Config};
//! use guestcall::codec::Value;
//! use guestcall::runtime::{share, GuestRuntime, RawAbiInvoker, RuntimeConfig};
//!
//! let config = Config::load("functions.json").unwrap();
//! let runtime = GuestRuntime::new(RuntimeConfig::default()).unwrap();
//! let wasm = std::fs::read("guest.wasm").unwrap();
//! let invoker = share(RawAbiInvoker::instantiate(runtime, wasm).unwrap());
//!
//! for bridge in bind(&config, &invoker).unwrap() {
//!     println!("{}", bridge.declaration());
//! }
//! ```

pub mod bridge;
pub mod codec;
pub mod error;
pub mod runtime;
pub mod schema;

pub use bridge::FunctionBridge;
pub use codec::Value;
pub use error::{CallError, Error};
pub use schema::{FunctionSignature, TypeDescriptor};
