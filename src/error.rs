
//! Error type definitions.

use std::borrow::Cow;
use std::error;
use std::fmt;

use crate::block::BlockId;
use crate::line::SampleType;


/// A result that may contain a processing error.
pub type Result<T> = std::result::Result<T, Error>;

/// A result that, if ok, contains nothing, and otherwise contains a processing error.
pub type UnitResult = Result<()>;


/// An error that may happen while building or driving a processing tree.
/// Distinguishes between programming errors of the caller (contract violations),
/// resource faults, invalid configuration, and faults in the coded data.
#[derive(Debug)]
pub enum Error {

    /// The caller violated the push/pull or reserve/finalize protocol,
    /// for example by pulling more lines than the tree declared,
    /// or by reserving memory after the arena was finalized.
    /// This always indicates a bug in the caller or in tree construction.
    Contract(Cow<'static, str>),

    /// A line buffer was accessed through the wrong representation.
    TypeMismatch {

        /// The sample type that was requested.
        expected: SampleType,

        /// The sample type the line was declared with.
        found: SampleType,
    },

    /// Memory could not be provided. The current tree is unusable,
    /// but the arena can be restarted and reused.
    Resource(Cow<'static, str>),

    /// The decomposition, kernel or options are contradicting or insufficient.
    Invalid(Cow<'static, str>),

    /// A code-block could not be decoded.
    /// The tree does not attempt to recover, substitution is left to the caller.
    Decode {

        /// The location of the offending code-block.
        block: BlockId,

        /// What went wrong inside the block coder.
        message: Cow<'static, str>,
    },
}


impl Error {

    /// Create an error of the variant `Contract`.
    pub(crate) fn contract(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Contract(message.into())
    }

    /// Create an error of the variant `Resource`.
    pub(crate) fn resource(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Resource(message.into())
    }

    /// Create an error of the variant `Invalid`.
    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        Error::Invalid(message.into())
    }

    /// Create an error of the variant `Decode`.
    pub(crate) fn decode(block: BlockId, message: impl Into<Cow<'static, str>>) -> Self {
        Error::Decode { block, message: message.into() }
    }

    /// Whether this error was caused by calling the tree incorrectly.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::Contract(_) | Error::TypeMismatch { .. })
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Contract(message) => write!(formatter, "contract violation: {}", message),
            Error::TypeMismatch { expected, found } => write!(
                formatter, "line holds {:?} samples but was accessed as {:?}", found, expected
            ),
            Error::Resource(message) => write!(formatter, "resource fault: {}", message),
            Error::Invalid(message) => write!(formatter, "invalid: {}", message),
            Error::Decode { block, message } => write!(formatter, "cannot decode {}: {}", block, message),
        }
    }
}


/// Convert a usize to an u8, returning an error on overflow.
#[inline]
pub(crate) fn usize_to_u8(value: usize, error_message: &'static str) -> Result<u8> {
    u8::try_from(value).map_err(|_| Error::invalid(error_message))
}
