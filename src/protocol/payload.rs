//! MessagePack payload codec
//!
//! Plugs exchange MessagePack-encoded payloads. Inbound payloads are decoded into
//! [`Payload`], a structural value that keeps map ordering and survives strings
//! that are not valid UTF-8 (those decode to [`Payload::Binary`]).

use serde::de::{self, DeserializeOwned, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

/// Codec failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Decoded message payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Payload>),
    /// Key/value pairs in wire order
    Map(Vec<(Payload, Payload)>),
}

impl Payload {
    pub fn is_nil(&self) -> bool {
        matches!(self, Payload::Nil)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Payload::Float(f) => Some(f),
            Payload::Int(i) => Some(i as f64),
            Payload::UInt(u) => Some(u as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Payload::Int(i) => Some(i),
            Payload::UInt(u) => i64::try_from(u).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Payload::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a map entry by string key
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Int(value)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::String(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::String(value)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(value: Vec<Payload>) -> Self {
        Payload::Array(value)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Nil => serializer.serialize_unit(),
            Payload::Bool(b) => serializer.serialize_bool(*b),
            Payload::Int(i) => serializer.serialize_i64(*i),
            Payload::UInt(u) => serializer.serialize_u64(*u),
            Payload::Float(f) => serializer.serialize_f64(*f),
            Payload::String(s) => serializer.serialize_str(s),
            Payload::Binary(b) => serializer.serialize_bytes(b),
            Payload::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Payload::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a MessagePack value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Payload, E> {
        Ok(Payload::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Payload, E> {
        Ok(Payload::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Payload, D::Error> {
        Deserialize::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Payload, E> {
        Ok(Payload::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Payload, E> {
        Ok(Payload::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Payload, E> {
        Ok(i64::try_from(v).map_or(Payload::UInt(v), Payload::Int))
    }

    fn visit_f32<E: de::Error>(self, v: f32) -> Result<Payload, E> {
        Ok(Payload::Float(f64::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Payload, E> {
        Ok(Payload::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Payload, E> {
        Ok(Payload::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Payload, E> {
        Ok(Payload::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Payload, E> {
        Ok(Payload::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
        Ok(Payload::Binary(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Payload, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Payload::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Payload, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(entry) = map.next_entry()? {
            entries.push(entry);
        }
        Ok(Payload::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PayloadVisitor)
    }
}

/// Encode any serializable value to MessagePack. Structs are encoded as maps.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a MessagePack payload into a structural [`Payload`].
///
/// The whole input must be consumed; trailing bytes are a decode failure.
pub fn decode(bytes: &[u8]) -> Result<Payload, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let payload = Payload::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor))?;
    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(CodecError::Decode(rmp_serde::decode::Error::Syntax(format!(
            "{} trailing bytes after payload",
            bytes.len() - consumed
        ))));
    }
    Ok(payload)
}

/// Decode a MessagePack payload straight into a typed value
pub fn decode_as<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
