//! Measurement (band) definitions and pixel data types.

use std::collections::BTreeMap;

use num_traits::{Bounded, NumCast, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Pixel data type of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

fn representable<T: NumCast + Bounded + ToPrimitive>(value: f64) -> bool {
    value.fract() == 0.0 && <T as NumCast>::from(value).is_some()
}

fn saturate<T: Bounded + ToPrimitive>(value: f64) -> f64 {
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    value.round().clamp(lo, hi)
}

impl DType {
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Whether `value` can be stored exactly in this type. NaN is only
    /// representable in floating point types.
    pub fn can_represent(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.is_float();
        }
        match self {
            Self::Bool => value == 0.0 || value == 1.0,
            Self::Int8 => representable::<i8>(value),
            Self::Uint8 => representable::<u8>(value),
            Self::Int16 => representable::<i16>(value),
            Self::Uint16 => representable::<u16>(value),
            Self::Int32 => representable::<i32>(value),
            Self::Uint32 => representable::<u32>(value),
            Self::Int64 => representable::<i64>(value),
            Self::Uint64 => representable::<u64>(value),
            Self::Float32 => value.is_infinite() || <f32 as NumCast>::from(value).is_some(),
            Self::Float64 => true,
        }
    }

    /// Coerce a computed value into this type's domain: integer types are
    /// rounded and saturated, floats pass through.
    pub fn coerce(&self, value: f64) -> f64 {
        if value.is_nan() || self.is_float() {
            return value;
        }
        match self {
            Self::Bool => {
                if value != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Int8 => saturate::<i8>(value),
            Self::Uint8 => saturate::<u8>(value),
            Self::Int16 => saturate::<i16>(value),
            Self::Uint16 => saturate::<u16>(value),
            Self::Int32 => saturate::<i32>(value),
            Self::Uint32 => saturate::<u32>(value),
            Self::Int64 => saturate::<i64>(value),
            Self::Uint64 => saturate::<u64>(value),
            Self::Float32 | Self::Float64 => value,
        }
    }
}

/// Bit positions of a flag, given as one bit or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bits {
    One(u32),
    Many(Vec<u32>),
}

impl Bits {
    pub fn positions(&self) -> Vec<u32> {
        match self {
            Self::One(b) => vec![*b],
            Self::Many(bs) => bs.clone(),
        }
    }
}

/// One named flag within a bit-field measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub bits: Bits,
    /// Value of the extracted bits (as a decimal string) to its meaning.
    pub values: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named band of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub dtype: DType,
    #[serde(default, deserialize_with = "nodata_value", skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags_definition: Option<BTreeMap<String, FlagDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectral_definition: Option<Value>,
    /// Name of the extra (non-spatial) dimension this band varies along.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_dim: Option<String>,
}

fn default_units() -> String {
    "1".to_string()
}

/// Nodata may be a number or a string such as `"nan"`.
fn nodata_value<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid nodata value '{}'", s))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid nodata value {}",
            other
        ))),
    }
}

impl Measurement {
    /// Nodata as a fill value; NaN when the band declares none.
    pub fn fill_value(&self) -> f64 {
        self.nodata.unwrap_or(f64::NAN)
    }

    /// Whether `name` refers to this band, by name or alias.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// Apply scale_factor / add_offset to convert a stored value to physical units.
    pub fn to_physical(&self, value: f64) -> f64 {
        value * self.scale_factor.unwrap_or(1.0) + self.add_offset.unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_can_represent() {
        assert!(DType::Int16.can_represent(-999.0));
        assert!(!DType::Uint8.can_represent(-1.0));
        assert!(!DType::Uint8.can_represent(256.0));
        assert!(!DType::Int16.can_represent(1.5));
        assert!(DType::Float32.can_represent(f64::NAN));
        assert!(!DType::Int32.can_represent(f64::NAN));
    }

    #[test]
    fn test_coerce_saturates() {
        assert_eq!(DType::Uint8.coerce(300.2), 255.0);
        assert_eq!(DType::Int16.coerce(-4.6), -5.0);
        assert_eq!(DType::Float32.coerce(0.25), 0.25);
    }

    #[test]
    fn test_parse_measurement() {
        let m: Measurement = serde_json::from_value(json!({
            "name": "nbart_red",
            "dtype": "int16",
            "nodata": -999,
            "units": "1",
            "aliases": ["red", "band04"]
        }))
        .unwrap();
        assert_eq!(m.nodata, Some(-999.0));
        assert!(m.answers_to("red"));
        assert!(!m.answers_to("green"));
    }

    #[test]
    fn test_nan_nodata_from_string() {
        let m: Measurement = serde_json::from_value(json!({
            "name": "ndvi", "dtype": "float32", "nodata": "NaN"
        }))
        .unwrap();
        assert!(m.fill_value().is_nan());
        assert_eq!(m.units, "1");
    }

    #[test]
    fn test_flag_bits() {
        let def: FlagDefinition = serde_json::from_value(json!({
            "bits": [0, 1],
            "values": {"0": "clear", "1": "cloud"}
        }))
        .unwrap();
        assert_eq!(def.bits.positions(), vec![0, 1]);
    }
}
