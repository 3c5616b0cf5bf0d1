//! Decoded property values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A property value in its decoded form
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    /// Floats, temperatures (Celsius) and pressures
    Float(f64),
    Date(DateTime<Utc>),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::Unsigned(u) => Some(*u != 0),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Unsigned(u) => Some(*u),
            Value::Integer(i) if *i >= 0 => Some(*i as u64),
            Value::Boolean(b) => Some(*b as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Unsigned(u) => i64::try_from(*u).ok(),
            Value::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::Unsigned(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Unpack `elements` low bits of a packed bitfield, LSB first
    pub fn unpack_bits(packed: u64, elements: usize) -> Vec<Value> {
        (0..elements)
            .map(|i| Value::Boolean((packed >> i) & 0x01 == 0x01))
            .collect()
    }

    /// Pack booleans into a bitfield, LSB first
    pub fn pack_bits(bits: &[Value]) -> Option<u64> {
        let mut packed = 0u64;
        for (i, bit) in bits.iter().enumerate() {
            if bit.as_bool()? {
                packed |= 1 << i;
            }
        }
        Some(packed)
    }
}

/// Output and input encoding selected by path modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Numbers right-aligned in 12 columns
    Padded,
    /// No padding
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TemperatureScale {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
    #[serde(rename = "K")]
    Kelvin,
    #[serde(rename = "R")]
    Rankine,
}

impl TemperatureScale {
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureScale::Celsius => celsius,
            TemperatureScale::Fahrenheit => celsius * 1.8 + 32.0,
            TemperatureScale::Kelvin => celsius + 273.15,
            TemperatureScale::Rankine => (celsius + 273.15) * 1.8,
        }
    }

    pub fn to_celsius(&self, value: f64) -> f64 {
        match self {
            TemperatureScale::Celsius => value,
            TemperatureScale::Fahrenheit => (value - 32.0) / 1.8,
            TemperatureScale::Kelvin => value - 273.15,
            TemperatureScale::Rankine => value / 1.8 - 273.15,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            TemperatureScale::Celsius => 'C',
            TemperatureScale::Fahrenheit => 'F',
            TemperatureScale::Kelvin => 'K',
            TemperatureScale::Rankine => 'R',
        }
    }
}

impl fmt::Display for TemperatureScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for TemperatureScale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" | "CELSIUS" => Ok(TemperatureScale::Celsius),
            "F" | "FAHRENHEIT" => Ok(TemperatureScale::Fahrenheit),
            "K" | "KELVIN" => Ok(TemperatureScale::Kelvin),
            "R" | "RANKINE" => Ok(TemperatureScale::Rankine),
            other => Err(format!("unknown temperature scale: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_packing() {
        let bits = Value::unpack_bits(0b1010_0101, 8);
        assert_eq!(bits[0], Value::Boolean(true));
        assert_eq!(bits[1], Value::Boolean(false));
        assert_eq!(bits[7], Value::Boolean(true));
        assert_eq!(Value::pack_bits(&bits), Some(0b1010_0101));
        assert_eq!(Value::pack_bits(&[Value::Text("x".into())]), None);
    }

    #[test]
    fn test_temperature_scales() {
        let f = TemperatureScale::Fahrenheit;
        assert!((f.from_celsius(100.0) - 212.0).abs() < 1e-9);
        assert!((f.to_celsius(32.0)).abs() < 1e-9);
        let k = TemperatureScale::Kelvin;
        assert!((k.to_celsius(k.from_celsius(22.5)) - 22.5).abs() < 1e-9);
        assert_eq!("r".parse::<TemperatureScale>(), Ok(TemperatureScale::Rankine));
        assert!("X".parse::<TemperatureScale>().is_err());
    }
}
