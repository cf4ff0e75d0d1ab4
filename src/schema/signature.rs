//! Declared shape of a guest function.

use super::TypeDescriptor;
use crate::error::SignatureError;
use std::fmt;

/// Name, ordered parameter descriptors, and the single return descriptor of
/// a guest function.
///
/// The return arity is validated when the signature is built, so a
/// `FunctionSignature` always has exactly one return descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    name: String,
    parameters: Vec<TypeDescriptor>,
    returns: TypeDescriptor,
}

impl FunctionSignature {
    /// Build a signature from a declaration.
    ///
    /// # Errors
    /// - `EmptyName` if `name` is empty
    /// - `ReturnArity` unless `returns` holds exactly one descriptor
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<TypeDescriptor>,
        returns: Vec<TypeDescriptor>,
    ) -> Result<Self, SignatureError> {
        let name = name.into();
        if name.is_empty() {
            return Err(SignatureError::EmptyName);
        }

        let count = returns.len();
        let mut returns = returns.into_iter();
        match (returns.next(), returns.next()) {
            (Some(returns), None) => Ok(FunctionSignature {
                name,
                parameters,
                returns,
            }),
            _ => Err(SignatureError::ReturnArity {
                function: name,
                count,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[TypeDescriptor] {
        &self.parameters
    }

    pub fn returns(&self) -> &TypeDescriptor {
        &self.returns
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Check that a call site supplies at least as many arguments as declared.
    pub fn check_arguments(&self, supplied: usize) -> Result<(), SignatureError> {
        if supplied < self.parameters.len() {
            return Err(SignatureError::MissingArguments {
                function: self.name.clone(),
                expected: self.parameters.len(),
                actual: supplied,
            });
        }
        Ok(())
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.returns)
    }
}
