//! Text wire format shared with the server.
//!
//! Terms travel as JSON with a `type` tag. Two shapes skip the object
//! overhead: integers become `"__integer__:<digits>"` so they keep full
//! precision, and UTF-8 binaries become `"__binary__:<text>"`.

mod decode;
mod encode;

use std::collections::BTreeMap;

use num_bigint::BigInt;
use serde_json::Value;
use thiserror::Error;

use crate::term::{ConversionError, Term, TermKind};

pub use decode::{decode, decode_term, parse_integer_marker};
pub use encode::{encode, encode_term};

pub(crate) use decode::term_from_json;

pub const INTEGER_MARKER: &str = "__integer__:";
pub const BINARY_MARKER: &str = "__binary__:";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{kind} cannot be sent to the server: {reason}")]
    NonTransmittable { kind: TermKind, reason: &'static str },

    #[error("float {0} has no wire representation")]
    NonFiniteFloat(f64),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid wire JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed term encoding: {0}")]
    Malformed(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Plain host value as it appears in outbound payloads. `Term` lets a
/// payload mix host data with remote-runtime values.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Bool(bool),
    Integer(BigInt),
    Number(serde_json::Number),
    String(String),
    Array(Vec<HostValue>),
    Object(BTreeMap<String, HostValue>),
    Term(Term),
}

impl From<Value> for HostValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => HostValue::Null,
            Value::Bool(flag) => HostValue::Bool(flag),
            Value::Number(number) => HostValue::Number(number),
            Value::String(text) => HostValue::String(text),
            Value::Array(items) => HostValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => HostValue::Object(
                map.into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        }
    }
}

impl From<Term> for HostValue {
    fn from(term: Term) -> Self {
        HostValue::Term(term)
    }
}

impl From<BigInt> for HostValue {
    fn from(value: BigInt) -> Self {
        HostValue::Integer(value)
    }
}
