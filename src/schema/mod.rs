//! Type descriptors and function signatures.

pub mod descriptor;
pub mod signature;

pub use descriptor::{ParseDescriptorError, TypeDescriptor};
pub use signature::FunctionSignature;
