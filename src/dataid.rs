//! Data id extraction from loosely typed events.
//!
//! Upstream events carry `dataid` either as an integer or as a decimal
//! string. Anything else is an error; there is no silent zero.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataIdError {
    #[error("{value} does not fit in a 32-bit data id")]
    OutOfRange { value: String },

    #[error("{value:?} is not a decimal integer")]
    NotDecimal { value: String },

    #[error("unsupported dataid type: {kind}")]
    UnsupportedType { kind: &'static str },

    #[error("dataid {value} is not positive")]
    NotPositive { value: i32 },
}

/// Convert a `dataid` value to a data id.
///
/// Accepts a JSON integer or a string holding a signed decimal integer.
/// Sign is not checked here; see [`positive_data_id`].
///
/// # Errors
///
/// Returns [`DataIdError`] for floats, non-numeric strings, values outside
/// `i32`, and every other JSON type.
pub fn parse_data_id(value: &Value) -> Result<i32, DataIdError> {
    match value {
        Value::Number(number) => {
            if number.is_f64() {
                return Err(DataIdError::UnsupportedType { kind: "float" });
            }
            number
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| DataIdError::OutOfRange {
                    value: number.to_string(),
                })
        }
        Value::String(text) => text.parse::<i32>().map_err(|_| DataIdError::NotDecimal {
            value: text.clone(),
        }),
        Value::Null => Err(DataIdError::UnsupportedType { kind: "null" }),
        Value::Bool(_) => Err(DataIdError::UnsupportedType { kind: "bool" }),
        Value::Array(_) => Err(DataIdError::UnsupportedType { kind: "array" }),
        Value::Object(_) => Err(DataIdError::UnsupportedType { kind: "object" }),
    }
}

/// Like [`parse_data_id`], additionally rejecting ids `<= 0`.
///
/// # Errors
///
/// Returns [`DataIdError::NotPositive`] for zero and negative ids, or any
/// error of [`parse_data_id`].
pub fn positive_data_id(value: &Value) -> Result<i32, DataIdError> {
    let data_id = parse_data_id(value)?;
    if data_id <= 0 {
        return Err(DataIdError::NotPositive { value: data_id });
    }
    Ok(data_id)
}
