//! Text and JSON encoding of property values
//!
//! Every format is encoded and decoded by matching on [`Format`]. Arrays are
//! joined with commas, except binary arrays which are concatenated.
//! [`ElementBuffer`] holds the raw bytes of a variable-length array together
//! with the length of each element so a single element can be replaced
//! without disturbing its neighbours.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::error::FsError;
use crate::registry::Format;
use crate::value::{Encoding, TemperatureScale, Value};

const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";
const PAD_WIDTH: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("not a number: {0:?}")]
    InvalidNumber(String),
    #[error("not a yes/no value: {0:?}")]
    InvalidBoolean(String),
    #[error("not a date: {0:?}")]
    InvalidDate(String),
    #[error("text is not valid UTF-8")]
    InvalidUtf8,
    #[error("expected {expected} elements, found {found}")]
    ElementCount { expected: usize, found: usize },
    #[error("invalid JSON input: {0}")]
    Json(String),
    #[error("{format:?} cannot carry {value}")]
    Mismatch { format: Format, value: String },
}

impl From<CodecError> for FsError {
    fn from(err: CodecError) -> Self {
        FsError::InvalidInput(err.to_string())
    }
}

/// How values are rendered for one query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    pub encoding: Encoding,
    pub scale: TemperatureScale,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::Padded,
            scale: TemperatureScale::Celsius,
        }
    }
}

fn mismatch(format: Format, value: &Value) -> CodecError {
    CodecError::Mismatch {
        format,
        value: format!("{:?}", value),
    }
}

/// Render a float with six significant digits, trailing zeros trimmed
pub fn format_float(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    if !(-5..6).contains(&exponent) {
        return format!("{:e}", value);
    }
    let decimals = (5 - exponent).max(0) as usize;
    let text = format!("{:.*}", decimals, value);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

fn scalar_text(format: Format, value: &Value, scale: TemperatureScale) -> Result<String, CodecError> {
    let text = match format {
        Format::Boolean => {
            let b = value.as_bool().ok_or_else(|| mismatch(format, value))?;
            if b { "1" } else { "0" }.to_string()
        }
        Format::Integer => value.as_i64().ok_or_else(|| mismatch(format, value))?.to_string(),
        Format::Unsigned | Format::Bitfield => {
            value.as_u64().ok_or_else(|| mismatch(format, value))?.to_string()
        }
        Format::Float | Format::Pressure => {
            format_float(value.as_f64().ok_or_else(|| mismatch(format, value))?)
        }
        Format::Temperature => {
            let celsius = value.as_f64().ok_or_else(|| mismatch(format, value))?;
            format_float(scale.from_celsius(celsius))
        }
        Format::Date => match value {
            Value::Date(date) => date.format(CTIME_FORMAT).to_string(),
            other => return Err(mismatch(format, other)),
        },
        Format::Ascii => match value {
            Value::Text(text) => text.clone(),
            other => return Err(mismatch(format, other)),
        },
        Format::Binary | Format::Directory | Format::Subdirectory => {
            return Err(mismatch(format, value))
        }
    };
    Ok(text)
}

fn is_padded(format: Format) -> bool {
    matches!(
        format,
        Format::Integer
            | Format::Unsigned
            | Format::Bitfield
            | Format::Float
            | Format::Temperature
            | Format::Pressure
    )
}

fn scalar_json(format: Format, value: &Value, scale: TemperatureScale) -> Result<serde_json::Value, CodecError> {
    let json = match (format, value) {
        (Format::Boolean, v) => serde_json::Value::Bool(v.as_bool().ok_or_else(|| mismatch(format, v))?),
        (Format::Integer, v) => v.as_i64().ok_or_else(|| mismatch(format, v))?.into(),
        (Format::Unsigned | Format::Bitfield, v) => v.as_u64().ok_or_else(|| mismatch(format, v))?.into(),
        (Format::Float | Format::Pressure, v) => {
            let f = v.as_f64().ok_or_else(|| mismatch(format, v))?;
            serde_json::Number::from_f64(f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
        }
        (Format::Temperature, v) => {
            let f = scale.from_celsius(v.as_f64().ok_or_else(|| mismatch(format, v))?);
            serde_json::Number::from_f64(f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
        }
        (Format::Date, Value::Date(date)) => serde_json::Value::String(date.to_rfc3339()),
        (Format::Ascii, Value::Text(text)) => serde_json::Value::String(text.clone()),
        (Format::Binary, Value::Bytes(bytes)) => serde_json::Value::String(hex::encode_upper(bytes)),
        (_, v) => return Err(mismatch(format, v)),
    };
    Ok(json)
}

/// Encode a single (non-array) value
pub fn encode(format: Format, value: &Value, options: CodecOptions) -> Result<Vec<u8>, CodecError> {
    match options.encoding {
        Encoding::Json => {
            let json = scalar_json(format, value, options.scale)?;
            Ok(json.to_string().into_bytes())
        }
        encoding => {
            if format == Format::Binary {
                return match value {
                    Value::Bytes(bytes) => Ok(bytes.clone()),
                    other => Err(mismatch(format, other)),
                };
            }
            let text = scalar_text(format, value, options.scale)?;
            if encoding == Encoding::Padded && is_padded(format) {
                Ok(format!("{:>width$}", text, width = PAD_WIDTH).into_bytes())
            } else {
                Ok(text.into_bytes())
            }
        }
    }
}

/// Encode every element of an array
pub fn encode_all(format: Format, values: &[Value], options: CodecOptions) -> Result<Vec<u8>, CodecError> {
    match options.encoding {
        Encoding::Json => {
            let items = values
                .iter()
                .map(|v| scalar_json(format, v, options.scale))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(serde_json::Value::Array(items).to_string().into_bytes())
        }
        _ if format == Format::Binary => {
            let mut out = Vec::new();
            for value in values {
                out.extend(encode(format, value, options)?);
            }
            Ok(out)
        }
        _ => {
            let mut out = Vec::new();
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend(encode(format, value, options)?);
            }
            Ok(out)
        }
    }
}

fn parse_bool(text: &str) -> Result<bool, CodecError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "on" | "true" => Ok(true),
        "0" | "no" | "off" | "false" => Ok(false),
        _ => Err(CodecError::InvalidBoolean(text.to_string())),
    }
}

fn parse_date(text: &str) -> Result<DateTime<Utc>, CodecError> {
    let trimmed = text.trim();
    if let Ok(seconds) = trimmed.parse::<i64>() {
        return Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| CodecError::InvalidDate(text.to_string()));
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, CTIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| CodecError::InvalidDate(text.to_string()))
}

fn decode_text(format: Format, text: &str, scale: TemperatureScale) -> Result<Value, CodecError> {
    let number = || CodecError::InvalidNumber(text.to_string());
    let value = match format {
        Format::Boolean => Value::Boolean(parse_bool(text)?),
        Format::Integer => Value::Integer(text.trim().parse().map_err(|_| number())?),
        Format::Unsigned | Format::Bitfield => Value::Unsigned(text.trim().parse().map_err(|_| number())?),
        Format::Float | Format::Pressure => Value::Float(text.trim().parse().map_err(|_| number())?),
        Format::Temperature => {
            let given: f64 = text.trim().parse().map_err(|_| number())?;
            Value::Float(scale.to_celsius(given))
        }
        Format::Date => Value::Date(parse_date(text)?),
        Format::Ascii => Value::Text(text.to_string()),
        Format::Binary => Value::Bytes(text.as_bytes().to_vec()),
        Format::Directory | Format::Subdirectory => {
            return Err(CodecError::Mismatch {
                format,
                value: text.to_string(),
            })
        }
    };
    Ok(value)
}

fn decode_json(format: Format, json: &serde_json::Value, scale: TemperatureScale) -> Result<Value, CodecError> {
    match (format, json) {
        (Format::Boolean, serde_json::Value::Bool(b)) => Ok(Value::Boolean(*b)),
        (Format::Binary, serde_json::Value::String(text)) => hex::decode(text)
            .map(Value::Bytes)
            .map_err(|e| CodecError::Json(e.to_string())),
        (Format::Ascii, serde_json::Value::String(text)) => Ok(Value::Text(text.clone())),
        (_, serde_json::Value::String(text)) => decode_text(format, text, scale),
        (_, serde_json::Value::Number(n)) => decode_text(format, &n.to_string(), scale),
        (_, serde_json::Value::Bool(b)) => decode_text(format, if *b { "1" } else { "0" }, scale),
        (_, other) => Err(CodecError::Json(format!("unexpected {}", other))),
    }
}

/// Decode a single (non-array) value
pub fn decode(format: Format, input: &[u8], options: CodecOptions) -> Result<Value, CodecError> {
    match options.encoding {
        Encoding::Json => {
            let json: serde_json::Value =
                serde_json::from_slice(input).map_err(|e| CodecError::Json(e.to_string()))?;
            decode_json(format, &json, options.scale)
        }
        _ if format == Format::Binary => Ok(Value::Bytes(input.to_vec())),
        _ => {
            let text = std::str::from_utf8(input).map_err(|_| CodecError::InvalidUtf8)?;
            let text = if format == Format::Ascii {
                text
            } else {
                text.trim_end_matches(['\n', '\0'])
            };
            decode_text(format, text, options.scale)
        }
    }
}

/// Decode a whole array of `elements` items
///
/// Binary arrays are split into `element_length` chunks.
pub fn decode_all(
    format: Format,
    input: &[u8],
    elements: usize,
    element_length: usize,
    options: CodecOptions,
) -> Result<Vec<Value>, CodecError> {
    let values = match options.encoding {
        Encoding::Json => {
            let json: serde_json::Value =
                serde_json::from_slice(input).map_err(|e| CodecError::Json(e.to_string()))?;
            let items = json
                .as_array()
                .ok_or_else(|| CodecError::Json("expected an array".to_string()))?;
            items
                .iter()
                .map(|item| decode_json(format, item, options.scale))
                .collect::<Result<Vec<_>, _>>()?
        }
        _ if format == Format::Binary => {
            if element_length == 0 || input.len() != elements * element_length {
                return Err(CodecError::ElementCount {
                    expected: elements,
                    found: input.len().checked_div(element_length).unwrap_or(0),
                });
            }
            input
                .chunks(element_length)
                .map(|chunk| Value::Bytes(chunk.to_vec()))
                .collect()
        }
        _ => {
            let text = std::str::from_utf8(input).map_err(|_| CodecError::InvalidUtf8)?;
            let text = text.trim_end_matches(['\n', '\0']);
            text.split(',')
                .map(|item| decode_text(format, item, options.scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    if values.len() != elements {
        return Err(CodecError::ElementCount {
            expected: elements,
            found: values.len(),
        });
    }
    Ok(values)
}

/// Overlay `data` onto `current` starting at `offset`, growing as needed
pub fn overlay(current: &[u8], offset: usize, data: &[u8]) -> Vec<u8> {
    let mut out = current.to_vec();
    if out.len() < offset {
        out.resize(offset, 0);
    }
    let end = offset + data.len();
    if out.len() < end {
        out.resize(end, 0);
    }
    out[offset..end].copy_from_slice(data);
    out
}

/// Raw bytes of a variable-length array plus the length of each element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementBuffer {
    bytes: Vec<u8>,
    lengths: Vec<usize>,
}

impl ElementBuffer {
    /// Collect text or byte elements into one buffer
    pub fn from_values(format: Format, values: &[Value]) -> Result<Self, CodecError> {
        let mut bytes = Vec::new();
        let mut lengths = Vec::with_capacity(values.len());
        for value in values {
            let raw = match value {
                Value::Text(text) => text.as_bytes(),
                Value::Bytes(raw) => raw.as_slice(),
                other => return Err(mismatch(format, other)),
            };
            bytes.extend_from_slice(raw);
            lengths.push(raw.len());
        }
        Ok(Self { bytes, lengths })
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    fn offset(&self, index: usize) -> usize {
        self.lengths[..index].iter().sum()
    }

    pub fn element(&self, index: usize) -> Option<&[u8]> {
        let length = *self.lengths.get(index)?;
        let start = self.offset(index);
        Some(&self.bytes[start..start + length])
    }

    /// Replace element `index`, shifting later elements as needed
    pub fn splice(&mut self, index: usize, replacement: &[u8]) -> Result<(), CodecError> {
        let length = *self.lengths.get(index).ok_or(CodecError::ElementCount {
            expected: self.lengths.len(),
            found: index + 1,
        })?;
        let start = self.offset(index);
        self.bytes
            .splice(start..start + length, replacement.iter().copied());
        self.lengths[index] = replacement.len();
        Ok(())
    }

    pub fn into_values(self, format: Format) -> Result<Vec<Value>, CodecError> {
        let mut values = Vec::with_capacity(self.lengths.len());
        let mut start = 0;
        for length in &self.lengths {
            let raw = &self.bytes[start..start + length];
            start += length;
            values.push(match format {
                Format::Ascii => Value::Text(
                    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)?,
                ),
                _ => Value::Bytes(raw.to_vec()),
            });
        }
        Ok(values)
    }
}
