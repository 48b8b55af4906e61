use serde::{Serialize, de::DeserializeOwned};

use crate::error::{BridgeError, Result};

/// Payload encoding for published snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON format (human-readable, good for debugging).
    #[default]
    Json,

    /// CBOR format (compact binary).
    Cbor,
}

/// Encode a value to bytes using the specified format.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Json => serde_json::to_vec(value).map_err(BridgeError::from),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)?;
            Ok(buf)
        }
    }
}

/// Decode bytes to a value using the specified format.
pub fn decode<T: DeserializeOwned>(data: &[u8], format: Format) -> Result<T> {
    match format {
        Format::Json => serde_json::from_slice(data).map_err(BridgeError::from),
        Format::Cbor => ciborium::from_reader(data).map_err(BridgeError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cbor_is_smaller() {
        let values: Vec<u16> = (0..64).collect();

        let json = encode(&values, Format::Json).unwrap();
        let cbor = encode(&values, Format::Cbor).unwrap();

        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
        assert_eq!(decode::<Vec<u16>>(&cbor, Format::Cbor).unwrap(), values);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode::<Vec<u16>>(b"not json", Format::Json).is_err());
        assert!(matches!(
            decode::<Vec<u16>>(&[0xff], Format::Cbor),
            Err(BridgeError::Serialization(_))
        ));
    }
}
