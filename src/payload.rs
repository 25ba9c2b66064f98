//! Payload - a single logged object
//!
//! Payloads are tagged variants so that heterogeneous values can be appended
//! to the same key over time and decoded without knowing their type ahead of
//! time. Media (images, video, figures) is encoded by the caller into a
//! [`Payload::Blob`].

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Dense numeric array in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NumericArray {
    /// Create an array, checking that `shape` matches the number of elements.
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] if the shape product differs from
    /// `data.len()`.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let array = Self { shape, data };
        array.check_shape()?;
        Ok(array)
    }

    /// One-dimensional array.
    #[must_use]
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Array dimensions.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat element storage.
    #[must_use]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn check_shape(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(Error::Serialization(format!(
                "array shape {:?} holds {expected} elements, got {}",
                self.shape,
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// A single logged object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Floating point scalar
    Scalar(f64),
    /// Integer scalar
    Integer(i64),
    /// Free text, e.g. one line of console output
    Text(String),
    /// Numeric array
    Array(NumericArray),
    /// Arbitrary structured value (parameters, metric rows)
    Json(serde_json::Value),
    /// Opaque bytes produced by an external encoder, base64 in JSON
    Blob(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Payload {
    /// Name of the variant, for logging.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::Array(_) => "array",
            Self::Json(_) => "json",
            Self::Blob(_) => "blob",
        }
    }

    /// Encode any serializable value as a [`Payload::Json`].
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] if the value cannot be represented
    /// as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Check that the payload can be encoded without loss.
    ///
    /// JSON has no representation for NaN or infinities, so those are
    /// rejected instead of being silently written as `null`.
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] on non-finite floats or inconsistent
    /// array shapes.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Scalar(v) if !v.is_finite() => Err(Error::Serialization(format!(
                "scalar {v} is not finite"
            ))),
            Self::Array(array) => {
                array.check_shape()?;
                if let Some(v) = array.data.iter().find(|v| !v.is_finite()) {
                    return Err(Error::Serialization(format!(
                        "array element {v} is not finite"
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NumericArray> for Payload {
    fn from(value: NumericArray) -> Self {
        Self::Array(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}
