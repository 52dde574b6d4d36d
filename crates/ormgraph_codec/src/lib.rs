//! # ormgraph Codec
//!
//! Scalar values and CBOR serialization for ormgraph.
//!
//! This crate provides:
//! - [`Value`], the dynamic scalar carried by rows, attributes and keys
//! - CBOR encoding of any `serde` type
//! - [`deep_clone`], which copies a structure through its serialized
//!   form so the copy shares no state with the original
//!
//! ## Usage
//!
//! ```
//! use ormgraph_codec::{to_cbor, from_cbor, Value};
//!
//! let value = Value::Integer(42);
//! let bytes = to_cbor(&value).unwrap();
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::{CodecError, CodecResult};
pub use value::Value;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(CodecError::encoding::<T>)?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(CodecError::decoding::<T>)
}

/// Clones a value by serializing and deserializing it.
///
/// Used to hand diffs and snapshots across a serialization boundary
/// without sharing any mutable state with the original.
pub fn deep_clone<T: Serialize + DeserializeOwned>(value: &T) -> CodecResult<T> {
    from_cbor(&to_cbor(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn roundtrip_scalars() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Integer(-100),
            Value::Real(2.5),
            Value::Text("hello world".to_string()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            let bytes = to_cbor(&value).unwrap();
            let decoded: Value = from_cbor(&bytes).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn deep_clone_of_map() {
        let mut row = BTreeMap::new();
        row.insert("ARTIST_NAME".to_string(), Value::from("Monet"));
        row.insert("ARTIST_ID".to_string(), Value::Integer(7));

        let copy = deep_clone(&row).unwrap();
        assert_eq!(copy, row);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: CodecResult<Value> = from_cbor(&[0xff, 0x00]);
        let err = result.unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { type_name, .. } if type_name.ends_with("Value")));
        assert!(err.to_string().starts_with("cannot decode"));
    }
}
