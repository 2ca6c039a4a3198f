//! Canonical text form of a term used as a map key.
//!
//! The key is the compact JSON of a tagged array, e.g. `["atom","ok"]` or
//! `["tuple",[["integer","1"],["atom","a"]]]`. Every variant has a form and
//! two terms share a key exactly when they are structurally equal.

use std::fmt::Write as _;

use num_bigint::BigInt;
use serde_json::{Value, json};

use super::{ConversionError, Handle, Origin, Term};

pub fn encode_map_key(term: &Term) -> String {
    key_form(term).to_string()
}

/// Inverse of [`encode_map_key`]. Local closures cannot be rebuilt.
pub fn decode_map_key(key: &str) -> Result<Term, ConversionError> {
    let value: Value = serde_json::from_str(key)
        .map_err(|err| ConversionError::MalformedKey(format!("{key}: {err}")))?;
    term_from_key_form(&value)
}

fn key_form(term: &Term) -> Value {
    match term {
        Term::Atom(atom) => json!(["atom", atom.name()]),
        Term::Integer(value) => json!(["integer", value.to_string()]),
        Term::Float(value) => json!(["float", format!("{:016x}", value.to_bits())]),
        Term::Bitstring(bits) => json!(["bitstring", bits.bit_len(), to_hex(bits.bytes())]),
        Term::List(list) => json!([
            "list",
            list.items().iter().map(key_form).collect::<Vec<_>>(),
            list.tail().map(key_form),
        ]),
        Term::Tuple(tuple) => json!([
            "tuple",
            tuple.elements().iter().map(key_form).collect::<Vec<_>>(),
        ]),
        Term::Map(map) => json!([
            "map",
            map.iter()
                .map(|(key, value)| json!([key_form(key), key_form(value)]))
                .collect::<Vec<_>>(),
        ]),
        Term::Pid(handle) => handle_form("pid", handle),
        Term::Port(handle) => handle_form("port", handle),
        Term::Reference(handle) => handle_form("reference", handle),
        Term::Function(function) => match function.capture_target() {
            Some((module, name)) => {
                json!(["capture", module.name(), name.name(), function.arity()])
            }
            None => json!([
                "closure",
                function.arity(),
                function.closure_id().map(|id| id.to_string()),
            ]),
        },
    }
}

fn handle_form(kind: &str, handle: &Handle) -> Value {
    json!([
        kind,
        handle.origin().as_str(),
        handle.node(),
        handle.segments(),
    ])
}

fn term_from_key_form(value: &Value) -> Result<Term, ConversionError> {
    let Value::Array(parts) = value else {
        return Err(malformed(value));
    };
    let Some((Value::String(tag), rest)) = parts.split_first() else {
        return Err(malformed(value));
    };

    match (tag.as_str(), rest) {
        ("atom", [Value::String(name)]) => Ok(Term::atom(name)),
        ("integer", [Value::String(digits)]) => digits
            .parse::<BigInt>()
            .map(Term::Integer)
            .map_err(|_| malformed(value)),
        ("float", [Value::String(bits)]) => u64::from_str_radix(bits, 16)
            .map(|bits| Term::Float(f64::from_bits(bits)))
            .map_err(|_| malformed(value)),
        ("bitstring", [bit_len, Value::String(hex)]) => {
            let bit_len = bit_len.as_u64().ok_or_else(|| malformed(value))?;
            let bytes = from_hex(hex).ok_or_else(|| malformed(value))?;
            Term::bitstring(bit_len as usize, bytes)
        }
        ("list", [Value::Array(items), tail]) => {
            let items = items
                .iter()
                .map(term_from_key_form)
                .collect::<Result<Vec<_>, _>>()?;
            match tail {
                Value::Null => Ok(Term::list(items)),
                tail => Term::improper_list(items, term_from_key_form(tail)?),
            }
        }
        ("tuple", [Value::Array(items)]) => Ok(Term::tuple(
            items
                .iter()
                .map(term_from_key_form)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        ("map", [Value::Array(entries)]) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry {
                    Value::Array(pair) if pair.len() == 2 => {
                        pairs.push((term_from_key_form(&pair[0])?, term_from_key_form(&pair[1])?));
                    }
                    other => return Err(malformed(other)),
                }
            }
            Ok(Term::map(pairs))
        }
        (
            kind @ ("pid" | "port" | "reference"),
            [Value::String(origin), Value::String(node), Value::Array(segments)],
        ) => {
            let origin = Origin::parse(origin).ok_or_else(|| malformed(value))?;
            let segments = segments
                .iter()
                .map(Value::as_u64)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| malformed(value))?;
            let handle = Handle::new(origin, node, segments);
            Ok(match kind {
                "pid" => Term::Pid(handle),
                "port" => Term::Port(handle),
                _ => Term::Reference(handle),
            })
        }
        ("capture", [Value::String(module), Value::String(function), arity]) => {
            let arity = arity
                .as_u64()
                .and_then(|arity| u8::try_from(arity).ok())
                .ok_or_else(|| malformed(value))?;
            Ok(Term::function_capture(module, function, arity))
        }
        ("closure", _) => Err(ConversionError::ClosureKey),
        _ => Err(malformed(value)),
    }
}

fn malformed(value: &Value) -> ConversionError {
    ConversionError::MalformedKey(value.to_string())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn from_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(hex.get(index..index + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(term: Term) {
        let key = encode_map_key(&term);
        let decoded = decode_map_key(&key).expect("decode key");
        assert_eq!(decoded, term, "key {key}");
    }

    #[test]
    fn atom_and_binary_keys_round_trip() {
        assert_round_trip(Term::atom("ok"));
        assert_round_trip(Term::atom("with \"quotes\" and, commas"));
        assert_round_trip(Term::string("hello"));
        assert_round_trip(Term::binary(vec![0, 255, 10]));
    }

    #[test]
    fn scalar_keys_round_trip() {
        assert_round_trip(Term::integer(-42));
        assert_round_trip(Term::integer(
            "-98765432109876543210987654321".parse::<BigInt>().expect("bigint"),
        ));
        assert_round_trip(Term::float(-0.0));
        assert_round_trip(Term::float(3.25));
        assert_round_trip(Term::bitstring(5, vec![0b1010_1000]).expect("bits"));
    }

    #[test]
    fn composite_keys_round_trip() {
        assert_round_trip(Term::list([Term::atom("a"), Term::integer(1)]));
        assert_round_trip(
            Term::improper_list([Term::integer(1)], Term::atom("tail")).expect("improper"),
        );
        assert_round_trip(Term::tuple([Term::string("x"), Term::list([])]));
        assert_round_trip(Term::map([
            (Term::atom("k"), Term::tuple([Term::integer(1)])),
            (Term::string("s"), Term::nil()),
        ]));
    }

    #[test]
    fn handle_and_capture_keys_round_trip() {
        assert_round_trip(Term::pid(Origin::Client, "client", vec![0, 1, 2]));
        assert_round_trip(Term::port(Origin::Server, "nonode@nohost", vec![7]));
        assert_round_trip(Term::reference(Origin::Server, "nonode@nohost", vec![1, 2, 3, 4]));
        assert_round_trip(Term::function_capture("Elixir.Kernel", "+", 2));
    }

    #[test]
    fn atom_and_string_keys_differ() {
        assert_ne!(
            encode_map_key(&Term::atom("a")),
            encode_map_key(&Term::string("a"))
        );
    }

    #[test]
    fn closure_keys_are_unique_but_not_rebuildable() {
        let a = Term::anonymous_function(0, |_| Term::nil());
        let b = Term::anonymous_function(0, |_| Term::nil());
        assert_ne!(encode_map_key(&a), encode_map_key(&b));
        assert_eq!(
            decode_map_key(&encode_map_key(&a)),
            Err(ConversionError::ClosureKey)
        );
    }

    #[test]
    fn garbage_keys_are_rejected() {
        assert!(matches!(
            decode_map_key("not json"),
            Err(ConversionError::MalformedKey(_))
        ));
        assert!(matches!(
            decode_map_key(r#"["nope",1]"#),
            Err(ConversionError::MalformedKey(_))
        ));
    }
}
