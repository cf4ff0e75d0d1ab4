//! Error taxonomy for guest calls.
//!
//! Each stage of a call has its own error type: signature validation,
//! encoding, transport and decoding. [`Error`] unifies them and
//! [`CallError`] attributes one to the guest function being called.

use crate::runtime::InvokerState;
use crate::schema::TypeDescriptor;
use std::fmt;

/// Declared-function or call-site arity violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Function name must not be empty")]
    EmptyName,
    #[error("Function `{function}` must return exactly 1 value, but declares {count}")]
    ReturnArity { function: String, count: usize },
    #[error("Function `{function}` expects {expected} arguments, but got {actual}")]
    MissingArguments {
        function: String,
        expected: usize,
        actual: usize,
    },
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Step from an enclosing value to the element that failed to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Positional call argument.
    Argument(usize),
    /// Array element.
    Index(usize),
    /// The key of the n-th map entry.
    Key(usize),
    /// The value stored under a key (rendered for display).
    Entry(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Argument(i) => write!(f, "args[{i}]"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
            PathSegment::Key(i) => write!(f, "{{key #{i}}}"),
            PathSegment::Entry(key) => write!(f, "{{{key}}}"),
        }
    }
}

/// Why a source value could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeErrorKind {
    /// The value's kind does not match the descriptor.
    #[error("found {found}")]
    KindMismatch { found: String },
    /// A number with a fractional part.
    #[error("not an integer")]
    NotAnInteger,
    /// An integer outside the 32-bit signed range.
    #[error("integer overflow: {value} does not fit in 32 bits")]
    IntegerOverflow { value: String },
    /// A string, sequence or mapping longer than a 32-bit count prefix allows.
    #[error("length {len} exceeds the wire format limit")]
    LengthOverflow { len: usize },
}

/// A source value does not fit its declared descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot encode {} as `{descriptor}`: {kind}{}", render_path(.path), location_suffix(.location))]
#[must_use]
pub struct EncodeError {
    /// Descriptor the offending value was encoded under.
    pub descriptor: TypeDescriptor,
    pub kind: EncodeErrorKind,
    /// Source location reported by the value, if any.
    pub location: Option<String>,
    path: Vec<PathSegment>,
}

impl EncodeError {
    pub fn new(descriptor: &TypeDescriptor, kind: EncodeErrorKind, location: Option<String>) -> Self {
        Self {
            descriptor: descriptor.clone(),
            kind,
            location,
            path: Vec::new(),
        }
    }

    /// Prefix the path with the step taken by an enclosing value.
    pub fn within(mut self, segment: PathSegment) -> Self {
        self.path.insert(0, segment);
        self
    }

    /// Path from the outermost value to the offending one.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// Path rendered as a string, `$` for the root value.
    pub fn path_string(&self) -> String {
        render_path(&self.path)
    }
}

fn render_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return "$".to_string();
    }
    path.iter().map(|s| s.to_string()).collect()
}

fn location_suffix(location: &Option<String>) -> String {
    match location {
        Some(location) => format!(" ({location})"),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Wire bytes that cannot be read under the expected descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unexpected end of input at byte {at}: {needed} more bytes needed")]
    UnexpectedEof { at: usize, needed: usize },
    #[error("Unexpected marker 0x{marker:02x} at byte {at} while reading {expected}")]
    UnexpectedMarker { at: usize, marker: u8, expected: String },
    #[error("Integer at byte {at} does not fit in 32 bits")]
    IntegerOverflow { at: usize },
    #[error("Count {count} at byte {at} exceeds the {remaining} bytes remaining")]
    CountOverflow { at: usize, count: u64, remaining: usize },
    #[error("Invalid UTF-8 in string at byte {at}")]
    InvalidUtf8 { at: usize },
    #[error("Duplicate object key at byte {at}")]
    DuplicateKey { at: usize },
    #[error("{count} trailing bytes after value at byte {at}")]
    TrailingBytes { at: usize, count: usize },
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Failures moving bytes to and from a guest module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to compile guest module: {0}")]
    Compile(String),
    #[error("Failed to instantiate guest module: {0}")]
    Instantiate(String),
    #[error("Guest module does not export {kind} `{name}`")]
    MissingExport { name: String, kind: &'static str },
    #[error("Guest export `{name}` has an unsupported signature: {reason}")]
    UnsupportedSignature { name: String, reason: String },
    #[error("{what} returned a null pointer")]
    NullPointer { what: String },
    #[error("Memory access out of bounds: offset {offset} + length {len} exceeds memory size {size}")]
    OutOfBounds { offset: u32, len: u64, size: usize },
    #[error("Guest function `{function}` trapped: {message}")]
    Trap { function: String, message: String },
    #[error("Guest function `{function}` returned {actual}, expected {expected}")]
    ResultShape {
        function: String,
        expected: String,
        actual: String,
    },
    #[error("Guest function `{function}` reported an error: {message}")]
    Guest { function: String, message: String },
    #[error("Invoker is {0}; calls are only valid once instantiated")]
    NotInstantiated(InvokerState),
    #[error("Guest instance is unusable after a fatal failure in `{0}`")]
    Poisoned(String),
    #[error("{what} of {len} bytes exceeds the 32-bit length limit")]
    TooLarge { what: String, len: usize },
}

impl TransportError {
    /// True when the error reflects a caller bug or an unusable instance
    /// rather than a failure of this particular call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::NotInstantiated(_) | TransportError::Poisoned(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Any failure during one guest call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A failed call, attributed to the guest function that was called.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Call to `{function}` failed: {source}")]
pub struct CallError {
    pub function: String,
    pub source: Error,
}

impl CallError {
    pub fn new(function: impl Into<String>, source: impl Into<Error>) -> Self {
        Self {
            function: function.into(),
            source: source.into(),
        }
    }
}
