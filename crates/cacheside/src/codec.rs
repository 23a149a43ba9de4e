//! Typed codec between native result values and the remote byte payload.
//!
//! Remote payloads are self-describing JSON. Encoding is a plain
//! `serde_json` serialization. Decoding dispatches on the shape the caller
//! declared for the result, not on the bytes: pointer-like targets decode
//! strictly in one step, every other shape decodes into a loosely-typed
//! intermediate [`Value`] first and is then coerced into the declared
//! target type, tolerating safe representation mismatches (numeric
//! strings, exact-valued floats in integer fields, numbers where strings
//! are expected). This two-phase decode is what lets a single read path
//! serve arbitrary result types without per-type code at the call site.
//!
//! The local backend never touches this module.

use serde::Serialize;
use serde::de::{
    self, DeserializeOwned, Deserializer, IntoDeserializer, MapAccess, SeqAccess, Visitor,
};
use serde_json::{Map, Value};

use crate::error::{CacheError, CacheResult};

/// Decode strategy for the declared result shape, chosen when the request
/// is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Boxed or otherwise indirect target; bytes decode strictly, straight
    /// into the destination type.
    Pointer,
    /// List-like target; elements are coerced leniently one by one.
    Sequence,
    /// Record or map target; fields are coerced leniently field by field.
    Mapping,
    /// Single-value target; coerced leniently.
    Scalar,
}

/// Encode a result value as self-describing JSON bytes.
pub(crate) fn encode<T: Serialize>(value: &T) -> CacheResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(CacheError::Encode)
}

/// Decode a remote payload into the declared target type, dispatching on
/// the declared shape.
pub(crate) fn decode<T: DeserializeOwned>(shape: Shape, bytes: &[u8]) -> CacheResult<T> {
    match shape {
        Shape::Pointer => serde_json::from_slice(bytes).map_err(CacheError::Decode),
        Shape::Sequence => {
            let elements: Vec<Value> = serde_json::from_slice(bytes).map_err(CacheError::Decode)?;
            T::deserialize(Lenient(Value::Array(elements))).map_err(CacheError::Decode)
        }
        Shape::Mapping => {
            let fields: Map<String, Value> =
                serde_json::from_slice(bytes).map_err(CacheError::Decode)?;
            T::deserialize(Lenient(Value::Object(fields))).map_err(CacheError::Decode)
        }
        Shape::Scalar => {
            let value: Value = serde_json::from_slice(bytes).map_err(CacheError::Decode)?;
            T::deserialize(Lenient(value)).map_err(CacheError::Decode)
        }
    }
}

type DecodeError = serde_json::Error;

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(expected: &str, value: &Value) -> DecodeError {
    de::Error::custom(format!(
        "cannot coerce {} into {expected}",
        json_type(value)
    ))
}

/// Signed-integer reading of a loose value. Accepts integer numbers,
/// floats with an exact integer value, numeric strings and booleans.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Unsigned counterpart of [`lenient_i64`].
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(u64::from(*b)),
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// Deserializer over a loosely-typed JSON intermediate that coerces into
/// the strictly-typed destination, recursively at every nesting level.
/// Lossy conversions fail; they are never silently dropped.
struct Lenient(Value);

macro_rules! lenient_number {
    ($method:ident, $visit:ident, $reader:ident, $expected:literal) => {
        fn $method<V>(self, visitor: V) -> Result<V::Value, Self::Error>
        where
            V: Visitor<'de>,
        {
            match $reader(&self.0) {
                Some(n) => visitor.$visit(n),
                None => Err(mismatch($expected, &self.0)),
            }
        }
    };
}

impl<'de> Deserializer<'de> for Lenient {
    type Error = DecodeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    visitor.visit_i64(i)
                } else if let Some(u) = n.as_u64() {
                    visitor.visit_u64(u)
                } else if let Some(f) = n.as_f64() {
                    visitor.visit_f64(f)
                } else {
                    Err(de::Error::custom("unrepresentable number"))
                }
            }
            Value::String(s) => visitor.visit_string(s),
            Value::Array(elements) => visitor.visit_seq(LenientSeq(elements.into_iter())),
            Value::Object(fields) => visitor.visit_map(LenientMap {
                iter: fields.into_iter(),
                value: None,
            }),
        }
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match lenient_bool(&self.0) {
            Some(b) => visitor.visit_bool(b),
            None => Err(mismatch("boolean", &self.0)),
        }
    }

    lenient_number!(deserialize_i8, visit_i64, lenient_i64, "integer");
    lenient_number!(deserialize_i16, visit_i64, lenient_i64, "integer");
    lenient_number!(deserialize_i32, visit_i64, lenient_i64, "integer");
    lenient_number!(deserialize_i64, visit_i64, lenient_i64, "integer");
    lenient_number!(deserialize_i128, visit_i64, lenient_i64, "integer");
    lenient_number!(deserialize_u8, visit_u64, lenient_u64, "unsigned integer");
    lenient_number!(deserialize_u16, visit_u64, lenient_u64, "unsigned integer");
    lenient_number!(deserialize_u32, visit_u64, lenient_u64, "unsigned integer");
    lenient_number!(deserialize_u64, visit_u64, lenient_u64, "unsigned integer");
    lenient_number!(deserialize_u128, visit_u64, lenient_u64, "unsigned integer");
    lenient_number!(deserialize_f32, visit_f64, lenient_f64, "float");
    lenient_number!(deserialize_f64, visit_f64, lenient_f64, "float");

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match &self.0 {
            Value::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => visitor.visit_char(c),
                    _ => Err(mismatch("single character", &self.0)),
                }
            }
            _ => Err(mismatch("single character", &self.0)),
        }
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::String(s) => visitor.visit_string(s),
            Value::Number(n) => visitor.visit_string(n.to_string()),
            Value::Bool(b) => visitor.visit_string(b.to_string()),
            other => Err(mismatch("string", &other)),
        }
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_byte_buf(visitor)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::String(s) => visitor.visit_byte_buf(s.into_bytes()),
            Value::Array(elements) => {
                let bytes = elements
                    .iter()
                    .map(|e| {
                        lenient_u64(e)
                            .and_then(|n| u8::try_from(n).ok())
                            .ok_or_else(|| mismatch("byte", e))
                    })
                    .collect::<Result<Vec<u8>, _>>()?;
                visitor.visit_byte_buf(bytes)
            }
            other => Err(mismatch("bytes", &other)),
        }
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Null => visitor.visit_unit(),
            other => Err(mismatch("null", &other)),
        }
    }

    fn deserialize_unit_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Array(elements) => visitor.visit_seq(LenientSeq(elements.into_iter())),
            other => Err(mismatch("array", &other)),
        }
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::Object(fields) => visitor.visit_map(LenientMap {
                iter: fields.into_iter(),
                value: None,
            }),
            other => Err(mismatch("object", &other)),
        }
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        match self.0 {
            Value::String(s) => visitor.visit_enum(s.into_deserializer()),
            Value::Object(fields) if fields.len() == 1 => {
                if let Some((variant, value)) = fields.into_iter().next() {
                    visitor.visit_enum(LenientEnum { variant, value })
                } else {
                    Err(de::Error::custom("empty enum object"))
                }
            }
            other => Err(mismatch("enum", &other)),
        }
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.deserialize_string(visitor)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_unit()
    }
}

struct LenientSeq(std::vec::IntoIter<Value>);

impl<'de> SeqAccess<'de> for LenientSeq {
    type Error = DecodeError;

    fn next_element_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>, Self::Error>
    where
        S: de::DeserializeSeed<'de>,
    {
        match self.0.next() {
            Some(value) => seed.deserialize(Lenient(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

struct LenientMap {
    iter: serde_json::map::IntoIter,
    value: Option<Value>,
}

impl<'de> MapAccess<'de> for LenientMap {
    type Error = DecodeError;

    fn next_key_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>, Self::Error>
    where
        S: de::DeserializeSeed<'de>,
    {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(key.into_deserializer()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<S>(&mut self, seed: S) -> Result<S::Value, Self::Error>
    where
        S: de::DeserializeSeed<'de>,
    {
        let value = self
            .value
            .take()
            .ok_or_else(|| de::Error::custom("value requested before key"))?;
        seed.deserialize(Lenient(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct LenientEnum {
    variant: String,
    value: Value,
}

impl<'de> de::EnumAccess<'de> for LenientEnum {
    type Error = DecodeError;
    type Variant = LenientVariant;

    fn variant_seed<S>(self, seed: S) -> Result<(S::Value, Self::Variant), Self::Error>
    where
        S: de::DeserializeSeed<'de>,
    {
        let variant = seed.deserialize(self.variant.into_deserializer())?;
        Ok((variant, LenientVariant(self.value)))
    }
}

struct LenientVariant(Value);

impl<'de> de::VariantAccess<'de> for LenientVariant {
    type Error = DecodeError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        match self.0 {
            Value::Null => Ok(()),
            other => Err(mismatch("unit variant", &other)),
        }
    }

    fn newtype_variant_seed<S>(self, seed: S) -> Result<S::Value, Self::Error>
    where
        S: de::DeserializeSeed<'de>,
    {
        seed.deserialize(Lenient(self.0))
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Lenient(self.0).deserialize_seq(visitor)
    }

    fn struct_variant<V>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Lenient(self.0).deserialize_map(visitor)
    }
}
