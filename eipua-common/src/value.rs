//! Value model shared between the acquisition and publication sides.
//!
//! A decoded reading is a runtime [`Value`]. Before it is written to a server
//! node it is turned into a [`TypedValue`] matching the node's declared
//! [`ValueKind`], or inferred from the runtime value when the declared type
//! is unknown.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Runtime value produced by the bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag (e.g. the watchdog).
    Bool(bool),

    /// Signed integer.
    Int(i64),

    /// Floating point measurement.
    Float(f64),

    /// Text (e.g. a rendered status word).
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Declared data type of a server node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    /// A type the bridge has no coercion rule for.
    Other(String),
}

impl ValueKind {
    /// Get the type name as reported by the server.
    pub fn as_str(&self) -> &str {
        match self {
            ValueKind::Boolean => "Boolean",
            ValueKind::SByte => "SByte",
            ValueKind::Byte => "Byte",
            ValueKind::Int16 => "Int16",
            ValueKind::UInt16 => "UInt16",
            ValueKind::Int32 => "Int32",
            ValueKind::UInt32 => "UInt32",
            ValueKind::Int64 => "Int64",
            ValueKind::UInt64 => "UInt64",
            ValueKind::Float => "Float",
            ValueKind::Double => "Double",
            ValueKind::String => "String",
            ValueKind::Other(name) => name,
        }
    }

    fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueKind::SByte
                | ValueKind::Byte
                | ValueKind::Int16
                | ValueKind::UInt16
                | ValueKind::Int32
                | ValueKind::UInt32
                | ValueKind::Int64
                | ValueKind::UInt64
        )
    }
}

impl FromStr for ValueKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Boolean" => ValueKind::Boolean,
            "SByte" => ValueKind::SByte,
            "Byte" => ValueKind::Byte,
            "Int16" => ValueKind::Int16,
            "UInt16" => ValueKind::UInt16,
            "Int32" => ValueKind::Int32,
            "UInt32" => ValueKind::UInt32,
            "Int64" => ValueKind::Int64,
            "UInt64" => ValueKind::UInt64,
            "Float" => ValueKind::Float,
            "Double" => ValueKind::Double,
            "String" => ValueKind::String,
            other => ValueKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value tagged with the wire type it will be written as.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
}

impl TypedValue {
    /// The kind this value will be written as.
    pub fn kind(&self) -> ValueKind {
        match self {
            TypedValue::Boolean(_) => ValueKind::Boolean,
            TypedValue::SByte(_) => ValueKind::SByte,
            TypedValue::Byte(_) => ValueKind::Byte,
            TypedValue::Int16(_) => ValueKind::Int16,
            TypedValue::UInt16(_) => ValueKind::UInt16,
            TypedValue::Int32(_) => ValueKind::Int32,
            TypedValue::UInt32(_) => ValueKind::UInt32,
            TypedValue::Int64(_) => ValueKind::Int64,
            TypedValue::UInt64(_) => ValueKind::UInt64,
            TypedValue::Float(_) => ValueKind::Float,
            TypedValue::Double(_) => ValueKind::Double,
            TypedValue::String(_) => ValueKind::String,
        }
    }
}

/// Coerce a runtime value to a node's declared type.
///
/// Unknown (`None`) or unsupported (`Other`) declared types, and values that
/// cannot be represented in the declared category (e.g. non-numeric text for
/// an integer node), fall back to [`infer`].
pub fn coerce(declared: Option<&ValueKind>, value: &Value) -> TypedValue {
    declared
        .and_then(|kind| coerce_to(kind, value))
        .unwrap_or_else(|| infer(value))
}

/// Pick a wire type from the runtime value alone.
pub fn infer(value: &Value) -> TypedValue {
    match value {
        Value::Bool(v) => TypedValue::Boolean(*v),
        Value::Int(v) => TypedValue::Int64(*v),
        Value::Float(v) => TypedValue::Double(*v),
        Value::Text(v) => TypedValue::String(v.clone()),
    }
}

fn coerce_to(kind: &ValueKind, value: &Value) -> Option<TypedValue> {
    match kind {
        ValueKind::Boolean => as_bool(value).map(TypedValue::Boolean),
        ValueKind::Float => as_f64(value).map(|v| TypedValue::Float(v as f32)),
        ValueKind::Double => as_f64(value).map(TypedValue::Double),
        ValueKind::String => Some(TypedValue::String(value.to_string())),
        k if k.is_integer() => as_i64(value).map(|v| clamp_integer(k, v)),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(v) => Some(*v),
        Value::Int(v) => Some(*v != 0),
        Value::Float(v) => Some(*v != 0.0),
        Value::Text(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" => Some(true),
            "false" | "0" | "off" => Some(false),
            _ => None,
        },
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Text(v) => v.trim().parse().ok(),
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(v) => Some(i64::from(*v)),
        Value::Int(v) => Some(*v),
        Value::Float(v) if v.is_finite() => Some(v.round() as i64),
        Value::Float(_) => None,
        Value::Text(v) => {
            let v = v.trim();
            v.parse::<i64>()
                .ok()
                .or_else(|| as_i64(&Value::Float(v.parse().ok()?)))
        }
    }
}

/// Saturate `v` into the range of the integer kind.
fn clamp_integer(kind: &ValueKind, v: i64) -> TypedValue {
    fn sat<T: TryFrom<i64> + Copy>(v: i64, min: T, max: T) -> T {
        T::try_from(v).unwrap_or(if v < 0 { min } else { max })
    }

    match kind {
        ValueKind::SByte => TypedValue::SByte(sat(v, i8::MIN, i8::MAX)),
        ValueKind::Byte => TypedValue::Byte(sat(v, u8::MIN, u8::MAX)),
        ValueKind::Int16 => TypedValue::Int16(sat(v, i16::MIN, i16::MAX)),
        ValueKind::UInt16 => TypedValue::UInt16(sat(v, u16::MIN, u16::MAX)),
        ValueKind::Int32 => TypedValue::Int32(sat(v, i32::MIN, i32::MAX)),
        ValueKind::UInt32 => TypedValue::UInt32(sat(v, u32::MIN, u32::MAX)),
        ValueKind::UInt64 => TypedValue::UInt64(sat(v, u64::MIN, u64::MAX)),
        _ => TypedValue::Int64(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_without_declared_type() {
        assert_eq!(coerce(None, &Value::Bool(true)), TypedValue::Boolean(true));
        assert_eq!(coerce(None, &Value::Float(1.5)), TypedValue::Double(1.5));
        assert_eq!(coerce(None, &Value::Int(7)), TypedValue::Int64(7));
        assert_eq!(
            coerce(None, &Value::from("okay")),
            TypedValue::String("okay".to_string())
        );
    }

    #[test]
    fn test_float_node() {
        let kind = ValueKind::Float;
        assert_eq!(
            coerce(Some(&kind), &Value::Float(23.5)),
            TypedValue::Float(23.5)
        );
        assert_eq!(coerce(Some(&kind), &Value::Int(2)), TypedValue::Float(2.0));
    }

    #[test]
    fn test_integer_nodes_saturate() {
        assert_eq!(
            coerce(Some(&ValueKind::Byte), &Value::Int(300)),
            TypedValue::Byte(255)
        );
        assert_eq!(
            coerce(Some(&ValueKind::UInt32), &Value::Int(-4)),
            TypedValue::UInt32(0)
        );
        assert_eq!(
            coerce(Some(&ValueKind::Int16), &Value::Float(12.6)),
            TypedValue::Int16(13)
        );
        assert_eq!(
            coerce(Some(&ValueKind::Int32), &Value::from(" 42 ")),
            TypedValue::Int32(42)
        );
    }

    #[test]
    fn test_boolean_node() {
        let kind = ValueKind::Boolean;
        assert_eq!(coerce(Some(&kind), &Value::Int(0)), TypedValue::Boolean(false));
        assert_eq!(
            coerce(Some(&kind), &Value::from("TRUE")),
            TypedValue::Boolean(true)
        );
    }

    #[test]
    fn test_string_node_renders_any_value() {
        assert_eq!(
            coerce(Some(&ValueKind::String), &Value::Float(1.25)),
            TypedValue::String("1.25".to_string())
        );
    }

    #[test]
    fn test_unrepresentable_falls_back_to_inference() {
        assert_eq!(
            coerce(Some(&ValueKind::Int32), &Value::from("okay")),
            TypedValue::String("okay".to_string())
        );
        assert_eq!(
            coerce(Some(&ValueKind::Int32), &Value::Float(f64::NAN)).kind(),
            ValueKind::Double
        );
    }

    #[test]
    fn test_unknown_declared_type() {
        let kind: ValueKind = "LocalizedText".parse().unwrap();
        assert_eq!(kind, ValueKind::Other("LocalizedText".to_string()));
        assert_eq!(coerce(Some(&kind), &Value::Float(3.0)), TypedValue::Double(3.0));
    }

    #[test]
    fn test_kind_names_round_trip() {
        for name in ["Boolean", "Int16", "UInt64", "Float", "Double", "String"] {
            let kind: ValueKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
    }
}
