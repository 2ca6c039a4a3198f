use num_bigint::BigInt;
use serde_json::Value;

use super::{BINARY_MARKER, DecodeError, HostValue, INTEGER_MARKER};
use crate::term::{Bitstring, Handle, Origin, Term};

/// Parses wire text, turning integer-marked strings back into big integers.
/// Everything else keeps its JSON typing.
pub fn decode(text: &str) -> Result<HostValue, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    Ok(restore_integers(value))
}

/// Parses wire text produced for a single term.
pub fn decode_term(text: &str) -> Result<Term, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    term_from_json(&value)
}

/// `Some` when `raw` is exactly the integer marker followed by an optional
/// minus sign and at least one decimal digit.
pub fn parse_integer_marker(raw: &str) -> Option<BigInt> {
    let digits = raw.strip_prefix(INTEGER_MARKER)?;
    let unsigned = digits.strip_prefix('-').unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn restore_integers(value: Value) -> HostValue {
    match value {
        Value::String(text) => match parse_integer_marker(&text) {
            Some(int) => HostValue::Integer(int),
            None => HostValue::String(text),
        },
        Value::Array(items) => HostValue::Array(items.into_iter().map(restore_integers).collect()),
        Value::Object(map) => HostValue::Object(
            map.into_iter()
                .map(|(key, value)| (key, restore_integers(value)))
                .collect(),
        ),
        other => HostValue::from(other),
    }
}

pub(crate) fn term_from_json(value: &Value) -> Result<Term, DecodeError> {
    match value {
        Value::Null => Ok(Term::nil()),
        Value::Bool(flag) => Ok(Term::boolean(*flag)),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Ok(Term::integer(int))
            } else if let Some(int) = number.as_u64() {
                Ok(Term::integer(int))
            } else {
                match number.as_f64() {
                    // Integers past 64 bits travel as integer markers.
                    Some(float) if beyond_64_bits(float) => Err(DecodeError::Malformed(format!(
                        "plain integer {number} exceeds 64 bits"
                    ))),
                    Some(float) => Ok(Term::float(float)),
                    None => Err(malformed(value)),
                }
            }
        }
        Value::String(text) => {
            if let Some(text) = text.strip_prefix(BINARY_MARKER) {
                Ok(Term::string(text))
            } else if let Some(int) = parse_integer_marker(text) {
                Ok(Term::Integer(int))
            } else {
                Err(DecodeError::Malformed(format!("unmarked string {text:?}")))
            }
        }
        Value::Array(items) => Ok(Term::list(decode_all(items)?)),
        Value::Object(fields) => {
            let kind = fields
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(value))?;
            match kind {
                "atom" => field_str(value, "value").map(Term::atom),
                "float" => fields
                    .get("value")
                    .and_then(Value::as_f64)
                    .map(Term::float)
                    .ok_or_else(|| malformed(value)),
                "bitstring" => {
                    let bits = field_array(value, "bits")?
                        .iter()
                        .map(|bit| bit.as_u64().and_then(|bit| u8::try_from(bit).ok()))
                        .collect::<Option<Vec<u8>>>()
                        .ok_or_else(|| malformed(value))?;
                    Ok(Term::Bitstring(Bitstring::from_bit_values(&bits)?))
                }
                "list" => {
                    let mut items = decode_all(field_array(value, "data")?)?;
                    let improper = fields
                        .get("improper")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if !improper {
                        return Ok(Term::list(items));
                    }
                    let tail = items.pop().ok_or_else(|| malformed(value))?;
                    Ok(Term::improper_list(items, tail)?)
                }
                "tuple" => Ok(Term::tuple(decode_all(field_array(value, "data")?)?)),
                "map" => {
                    let mut pairs = Vec::new();
                    for entry in field_array(value, "data")? {
                        match entry.as_array().map(Vec::as_slice) {
                            Some([key, value]) => {
                                pairs.push((term_from_json(key)?, term_from_json(value)?));
                            }
                            _ => return Err(malformed(entry)),
                        }
                    }
                    Ok(Term::map(pairs))
                }
                "pid" | "port" | "reference" => {
                    let node = field_str(value, "node")?;
                    let segments = field_array(value, "segments")?
                        .iter()
                        .map(Value::as_u64)
                        .collect::<Option<Vec<u64>>>()
                        .ok_or_else(|| malformed(value))?;
                    let handle = Handle::new(Origin::Server, node, segments);
                    Ok(match kind {
                        "pid" => Term::Pid(handle),
                        "port" => Term::Port(handle),
                        _ => Term::Reference(handle),
                    })
                }
                "anonymous_function" => {
                    let module = field_str(value, "module")?;
                    let function = field_str(value, "function")?;
                    let arity = fields
                        .get("arity")
                        .and_then(Value::as_u64)
                        .and_then(|arity| u8::try_from(arity).ok())
                        .ok_or_else(|| malformed(value))?;
                    Ok(Term::function_capture(module, function, arity))
                }
                other => Err(DecodeError::Malformed(format!("unknown term type {other:?}"))),
            }
        }
    }
}

fn beyond_64_bits(float: f64) -> bool {
    float.fract() == 0.0 && (float >= u64::MAX as f64 || float < i64::MIN as f64)
}

fn decode_all(items: &[Value]) -> Result<Vec<Term>, DecodeError> {
    items.iter().map(term_from_json).collect()
}

fn field_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, DecodeError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(value))
}

fn field_array<'a>(value: &'a Value, field: &str) -> Result<&'a [Value], DecodeError> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(value))
}

fn malformed(value: &Value) -> DecodeError {
    DecodeError::Malformed(value.to_string())
}
