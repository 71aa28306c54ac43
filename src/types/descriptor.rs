//! Request descriptor: the semantic input a cache key is derived from.

use serde::{ser, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Semantic input of one outbound call.
///
/// Parameters are kept in a `BTreeMap` so iteration (and therefore
/// serialization) order never depends on insertion order. Builder methods
/// consume `self`; once handed to the executor a descriptor is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDescriptor {
    payload: String,
    parameters: BTreeMap<String, Value>,
    /// First parameter that failed to serialize, reported at key derivation.
    #[serde(skip)]
    rejected: Option<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            parameters: BTreeMap::new(),
            rejected: None,
        }
    }

    /// Add a parameter from any serializable value (`&str`, numbers, `json!`).
    ///
    /// Non-finite floats are recorded as a rejection rather than collapsing
    /// to `null`.
    pub fn with_param(self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.with_serialized_param(name, &value)
    }

    /// Add a parameter from an arbitrary serializable value.
    ///
    /// Serialization failures (e.g. maps with non-string keys, NaN or
    /// infinite floats at any depth) do not panic here; the descriptor is
    /// marked invalid and key derivation fails with `InvalidDescriptor`.
    pub fn with_serialized_param<V: Serialize + ?Sized>(
        mut self,
        name: impl Into<String>,
        value: &V,
    ) -> Self {
        let name = name.into();
        let converted = value
            .serialize(FiniteFloats)
            .and_then(|()| serde_json::to_value(value));
        match converted {
            Ok(v) => {
                self.parameters.insert(name, v);
            }
            Err(e) => {
                if self.rejected.is_none() {
                    self.rejected = Some((name, e.to_string()));
                }
            }
        }
        self
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// The `model` parameter, when present and a string.
    pub fn model(&self) -> Option<&str> {
        self.parameters.get("model").and_then(|v| v.as_str())
    }

    pub(crate) fn rejected_param(&self) -> Option<(&str, &str)> {
        self.rejected
            .as_ref()
            .map(|(name, reason)| (name.as_str(), reason.as_str()))
    }
}

/// Serializer that produces nothing and fails on the first NaN or infinite
/// float. `serde_json` would otherwise write those as `null`.
#[derive(Clone, Copy)]
struct FiniteFloats;

fn check_float(v: f64) -> Result<(), serde_json::Error> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(ser::Error::custom(format!("non-finite float {v} is not valid JSON")))
    }
}

macro_rules! accept {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(fn $method(self, _v: $ty) -> Result<(), serde_json::Error> { Ok(()) })*
    };
}

impl ser::Serializer for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept! {
        serialize_bool: bool,
        serialize_i8: i8, serialize_i16: i16, serialize_i32: i32,
        serialize_i64: i64, serialize_i128: i128,
        serialize_u8: u8, serialize_u16: u16, serialize_u32: u32,
        serialize_u64: u64, serialize_u128: u128,
        serialize_char: char, serialize_str: &str, serialize_bytes: &[u8],
        serialize_unit_struct: &'static str,
    }

    fn serialize_f32(self, v: f32) -> Result<(), serde_json::Error> {
        check_float(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<(), serde_json::Error> {
        check_float(v)
    }

    fn serialize_none(self) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<(), serde_json::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), serde_json::Error> {
        Ok(())
    }

    fn serialize_newtype_struct<T>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<(), serde_json::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), serde_json::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, serde_json::Error> {
        Ok(self)
    }
}

macro_rules! check_elements {
    ($($tr:ident :: $method:ident),* $(,)?) => {
        $(impl ser::$tr for FiniteFloats {
            type Ok = ();
            type Error = serde_json::Error;

            fn $method<T>(&mut self, value: &T) -> Result<(), serde_json::Error>
            where
                T: ?Sized + Serialize,
            {
                value.serialize(*self)
            }

            fn end(self) -> Result<(), serde_json::Error> {
                Ok(())
            }
        })*
    };
}

check_elements! {
    SerializeSeq::serialize_element,
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field,
}

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = serde_json::Error;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), serde_json::Error>
    where
        T: ?Sized + Serialize,
    {
        key.serialize(*self)
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), serde_json::Error>
    where
        T: ?Sized + Serialize,
    {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), serde_json::Error> {
        Ok(())
    }
}

macro_rules! check_fields {
    ($($tr:ident),* $(,)?) => {
        $(impl ser::$tr for FiniteFloats {
            type Ok = ();
            type Error = serde_json::Error;

            fn serialize_field<T>(
                &mut self,
                _key: &'static str,
                value: &T,
            ) -> Result<(), serde_json::Error>
            where
                T: ?Sized + Serialize,
            {
                value.serialize(*self)
            }

            fn end(self) -> Result<(), serde_json::Error> {
                Ok(())
            }
        })*
    };
}

check_fields!(SerializeStruct, SerializeStructVariant);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_collects_params() {
        let d = RequestDescriptor::new("hello")
            .with_param("model", "x")
            .with_param("temperature", 0.7)
            .with_param("max_tokens", 256);
        assert_eq!(d.payload(), "hello");
        assert_eq!(d.model(), Some("x"));
        assert_eq!(d.parameter("max_tokens"), Some(&json!(256)));
        assert_eq!(d.parameters().len(), 3);
        assert!(d.rejected_param().is_none());
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = RequestDescriptor::new("p")
            .with_param("model", "x")
            .with_param("temperature", 0);
        let b = RequestDescriptor::new("p")
            .with_param("temperature", 0)
            .with_param("model", "x");
        assert_eq!(a, b);
    }

    #[test]
    fn test_unserializable_param_is_recorded() {
        let mut weird = BTreeMap::new();
        weird.insert((1u8, 2u8), "tuple keys are not valid JSON object keys");
        let d = RequestDescriptor::new("p").with_serialized_param("weird", &weird);
        let (name, _) = d.rejected_param().expect("rejection recorded");
        assert_eq!(name, "weird");
        assert!(d.parameter("weird").is_none());
    }

    #[test]
    fn test_serialized_param_struct() {
        #[derive(Serialize)]
        struct Stop {
            sequences: Vec<&'static str>,
        }
        let d = RequestDescriptor::new("p").with_serialized_param(
            "stop",
            &Stop {
                sequences: vec!["\n\n"],
            },
        );
        assert_eq!(d.parameter("stop"), Some(&json!({"sequences": ["\n\n"]})));
    }

    #[test]
    fn test_non_finite_floats_are_recorded_not_nulled() {
        let cases = [
            RequestDescriptor::new("p").with_param("temperature", f64::NAN),
            RequestDescriptor::new("p").with_param("temperature", f32::INFINITY),
            RequestDescriptor::new("p")
                .with_serialized_param("temperature", &vec![Some(0.5), Some(f64::NEG_INFINITY)]),
        ];
        for d in cases {
            let (name, reason) = d.rejected_param().expect("rejection recorded");
            assert_eq!(name, "temperature");
            assert!(reason.contains("non-finite"), "{reason}");
            assert!(d.parameter("temperature").is_none());
        }
    }

    #[test]
    fn test_explicit_null_and_optionals_are_accepted() {
        let d = RequestDescriptor::new("p")
            .with_param("stop", Value::Null)
            .with_param("seed", None::<u64>)
            .with_param("top_p", Some(0.9));
        assert!(d.rejected_param().is_none());
        assert_eq!(d.parameter("stop"), Some(&Value::Null));
        assert_eq!(d.parameter("seed"), Some(&Value::Null));
        assert_eq!(d.parameter("top_p"), Some(&json!(0.9)));
    }
}
