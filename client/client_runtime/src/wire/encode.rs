use serde_json::{Map as JsonMap, Number, Value, json};

use super::{BINARY_MARKER, EncodeError, HostValue, INTEGER_MARKER};
use crate::term::{Handle, Origin, Term, TermKind};

/// Serializes a host value, which may embed terms, to wire text.
pub fn encode(value: &HostValue) -> Result<String, EncodeError> {
    host_to_json(value).map(|json| json.to_string())
}

pub fn encode_term(term: &Term) -> Result<String, EncodeError> {
    term_to_json(term).map(|json| json.to_string())
}

fn host_to_json(value: &HostValue) -> Result<Value, EncodeError> {
    Ok(match value {
        HostValue::Null => Value::Null,
        HostValue::Bool(flag) => Value::Bool(*flag),
        HostValue::Integer(int) => Value::String(format!("{INTEGER_MARKER}{int}")),
        HostValue::Number(number) => Value::Number(number.clone()),
        HostValue::String(text) => Value::String(text.clone()),
        HostValue::Array(items) => Value::Array(
            items
                .iter()
                .map(host_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        HostValue::Object(fields) => {
            let mut map = JsonMap::new();
            for (key, value) in fields {
                map.insert(key.clone(), host_to_json(value)?);
            }
            Value::Object(map)
        }
        HostValue::Term(term) => term_to_json(term)?,
    })
}

fn term_to_json(term: &Term) -> Result<Value, EncodeError> {
    match term {
        Term::Atom(atom) => Ok(json!({ "type": "atom", "value": atom.name() })),
        Term::Integer(int) => Ok(Value::String(format!("{INTEGER_MARKER}{int}"))),
        Term::Float(value) => Number::from_f64(*value)
            .map(|number| json!({ "type": "float", "value": number }))
            .ok_or(EncodeError::NonFiniteFloat(*value)),
        Term::Bitstring(bits) => Ok(match bits.text() {
            Some(text) => Value::String(format!("{BINARY_MARKER}{text}")),
            None => json!({ "type": "bitstring", "bits": bits.bits().collect::<Vec<u8>>() }),
        }),
        Term::List(list) => {
            let mut data = encode_all(list.items())?;
            match list.tail() {
                None => Ok(json!({ "type": "list", "data": data })),
                Some(tail) => {
                    data.push(term_to_json(tail)?);
                    Ok(json!({ "type": "list", "data": data, "improper": true }))
                }
            }
        }
        Term::Tuple(tuple) => Ok(json!({ "type": "tuple", "data": encode_all(tuple.elements())? })),
        Term::Map(map) => {
            let data = map
                .iter()
                .map(|(key, value)| Ok(json!([term_to_json(key)?, term_to_json(value)?])))
                .collect::<Result<Vec<_>, EncodeError>>()?;
            Ok(json!({ "type": "map", "data": data }))
        }
        Term::Pid(handle) => handle_to_json(TermKind::Pid, handle),
        Term::Port(handle) => handle_to_json(TermKind::Port, handle),
        Term::Reference(handle) => handle_to_json(TermKind::Reference, handle),
        Term::Function(function) => match function.capture_target() {
            Some((module, name)) => Ok(json!({
                "type": "anonymous_function",
                "module": module.name(),
                "function": name.name(),
                "arity": function.arity(),
            })),
            None => Err(EncodeError::NonTransmittable {
                kind: TermKind::AnonymousFunction,
                reason: "not a named function capture",
            }),
        },
    }
}

fn encode_all(items: &[Term]) -> Result<Vec<Value>, EncodeError> {
    items.iter().map(term_to_json).collect()
}

fn handle_to_json(kind: TermKind, handle: &Handle) -> Result<Value, EncodeError> {
    match handle.origin() {
        Origin::Client => Err(EncodeError::NonTransmittable {
            kind,
            reason: "handle was created on the client",
        }),
        Origin::Server => Ok(json!({
            "type": kind.as_str(),
            "node": handle.node(),
            "segments": handle.segments(),
        })),
    }
}
