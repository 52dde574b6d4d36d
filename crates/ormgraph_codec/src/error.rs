//! Codec errors.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Serialization failures, naming the Rust type involved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A value could not be written as CBOR.
    #[error("cannot encode {type_name} as CBOR: {message}")]
    EncodingFailed {
        /// Type being encoded.
        type_name: &'static str,
        /// Reason reported by the encoder.
        message: String,
    },

    /// Bytes could not be read back as the requested type.
    #[error("cannot decode {type_name} from CBOR: {message}")]
    DecodingFailed {
        /// Type being decoded.
        type_name: &'static str,
        /// Reason reported by the decoder.
        message: String,
    },
}

impl CodecError {
    pub(crate) fn encoding<T: ?Sized>(message: impl ToString) -> Self {
        Self::EncodingFailed {
            type_name: std::any::type_name::<T>(),
            message: message.to_string(),
        }
    }

    pub(crate) fn decoding<T>(message: impl ToString) -> Self {
        Self::DecodingFailed {
            type_name: std::any::type_name::<T>(),
            message: message.to_string(),
        }
    }
}
