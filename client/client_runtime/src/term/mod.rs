//! In-memory model of values owned by the remote runtime.
//!
//! Every `Term` is immutable once built. Composite variants hold their
//! children behind `Arc`, so clones are cheap and a term can be shared between
//! queued commands, page snapshots and the render layer without copying.
//! Operations that "change" a term (such as [`Map::put`]) return a new value.

mod bitstring;
mod function;
mod handle;
mod inspect;
mod map;
mod map_key;

use std::fmt;
use std::sync::Arc;

use num_bigint::BigInt;
use thiserror::Error;

pub use bitstring::Bitstring;
pub use function::Function;
pub use handle::{Handle, Origin};
pub use map::Map;
pub use map_key::{decode_map_key, encode_map_key};

/// Failure to derive a term from raw input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("element {0} is not a valid character")]
    NotCharacter(String),

    #[error("bit length {bit_len} does not match a buffer of {byte_len} bytes")]
    BitLength { bit_len: usize, byte_len: usize },

    #[error("bit values must be 0 or 1, got {0}")]
    InvalidBit(u8),

    #[error("bitstring of {bit_len} bits is not a binary")]
    NotBinary { bit_len: usize },

    #[error("binary is not valid UTF-8 text")]
    InvalidUtf8,

    #[error("an improper list needs at least one element before its tail")]
    EmptyImproperList,

    #[error("expected a list, got {0}")]
    NotAList(TermKind),

    #[error("malformed map key: {0}")]
    MalformedKey(String),

    #[error("local closures cannot be rebuilt from a map key")]
    ClosureKey,

    #[error("function is a capture of {0} and cannot be invoked locally")]
    NotInvocable(String),

    #[error("function of arity {expected} called with {actual} argument(s)")]
    ArityMismatch { expected: u8, actual: usize },
}

/// An interned symbolic constant. Two atoms with the same name are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Atom(Arc<str>);

impl Atom {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered sequence of terms. A list is improper when its tail is not a list.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    items: Arc<[Term]>,
    tail: Option<Arc<Term>>,
}

impl List {
    pub fn items(&self) -> &[Term] {
        &self.items
    }

    pub fn tail(&self) -> Option<&Term> {
        self.tail.as_deref()
    }

    pub fn is_proper(&self) -> bool {
        self.tail.is_none()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.tail.is_none()
    }
}

/// Fixed-arity ordered sequence of terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple(Arc<[Term]>);

impl Tuple {
    pub fn elements(&self) -> &[Term] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Option<&Term> {
        self.0.get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    Atom,
    Integer,
    Float,
    Bitstring,
    List,
    Map,
    Tuple,
    Pid,
    Port,
    Reference,
    AnonymousFunction,
}

impl TermKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TermKind::Atom => "atom",
            TermKind::Integer => "integer",
            TermKind::Float => "float",
            TermKind::Bitstring => "bitstring",
            TermKind::List => "list",
            TermKind::Map => "map",
            TermKind::Tuple => "tuple",
            TermKind::Pid => "pid",
            TermKind::Port => "port",
            TermKind::Reference => "reference",
            TermKind::AnonymousFunction => "anonymous_function",
        }
    }
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Term {
    Atom(Atom),
    Integer(BigInt),
    Float(f64),
    Bitstring(Bitstring),
    List(List),
    Map(Map),
    Tuple(Tuple),
    Pid(Handle),
    Port(Handle),
    Reference(Handle),
    Function(Function),
}

impl Term {
    pub fn atom(name: impl AsRef<str>) -> Self {
        Term::Atom(Atom::new(name))
    }

    pub fn nil() -> Self {
        Term::atom("nil")
    }

    pub fn boolean(value: bool) -> Self {
        Term::atom(if value { "true" } else { "false" })
    }

    pub fn integer(value: impl Into<BigInt>) -> Self {
        Term::Integer(value.into())
    }

    pub fn float(value: f64) -> Self {
        Term::Float(value)
    }

    /// Binary built from UTF-8 text.
    pub fn string(text: impl Into<String>) -> Self {
        Term::Bitstring(Bitstring::from_text(text))
    }

    /// Binary built from raw bytes.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Term::Bitstring(Bitstring::from_bytes(bytes))
    }

    /// Bitstring of `bit_len` bits packed most-significant-bit first in `bytes`.
    pub fn bitstring(bit_len: usize, bytes: impl Into<Vec<u8>>) -> Result<Self, ConversionError> {
        Bitstring::from_bits(bit_len, bytes).map(Term::Bitstring)
    }

    pub fn list(items: impl IntoIterator<Item = Term>) -> Self {
        Term::List(List {
            items: items.into_iter().collect(),
            tail: None,
        })
    }

    /// `[items | tail]`. A list tail is spliced in, so the result is only
    /// improper when `tail` is not itself a list.
    pub fn improper_list(
        items: impl IntoIterator<Item = Term>,
        tail: Term,
    ) -> Result<Self, ConversionError> {
        let mut items: Vec<Term> = items.into_iter().collect();
        if items.is_empty() {
            return Err(ConversionError::EmptyImproperList);
        }

        match tail {
            Term::List(list) => {
                items.extend(list.items.iter().cloned());
                Ok(Term::List(List {
                    items: items.into(),
                    tail: list.tail,
                }))
            }
            other => Ok(Term::List(List {
                items: items.into(),
                tail: Some(Arc::new(other)),
            })),
        }
    }

    /// List of `{key, value}` tuples with atom keys.
    pub fn keyword_list<K: AsRef<str>>(pairs: impl IntoIterator<Item = (K, Term)>) -> Self {
        Term::list(
            pairs
                .into_iter()
                .map(|(key, value)| Term::tuple([Term::atom(key), value])),
        )
    }

    /// Later pairs win when two keys are structurally equal.
    pub fn map(pairs: impl IntoIterator<Item = (Term, Term)>) -> Self {
        Term::Map(Map::from_pairs(pairs))
    }

    pub fn tuple(items: impl IntoIterator<Item = Term>) -> Self {
        Term::Tuple(Tuple(items.into_iter().collect()))
    }

    pub fn pid(origin: Origin, node: impl AsRef<str>, segments: impl Into<Vec<u64>>) -> Self {
        Term::Pid(Handle::new(origin, node, segments))
    }

    pub fn port(origin: Origin, node: impl AsRef<str>, segments: impl Into<Vec<u64>>) -> Self {
        Term::Port(Handle::new(origin, node, segments))
    }

    pub fn reference(
        origin: Origin,
        node: impl AsRef<str>,
        segments: impl Into<Vec<u64>>,
    ) -> Self {
        Term::Reference(Handle::new(origin, node, segments))
    }

    /// Local closure. It can be invoked on the client but never sent to the server.
    pub fn anonymous_function<F>(arity: u8, fun: F) -> Self
    where
        F: Fn(&[Term]) -> Term + Send + Sync + 'static,
    {
        Term::Function(Function::closure(arity, fun))
    }

    /// `&module.function/arity`.
    pub fn function_capture(
        module: impl AsRef<str>,
        function: impl AsRef<str>,
        arity: u8,
    ) -> Self {
        Term::Function(Function::capture(module, function, arity))
    }

    /// Converts a list of code points into a UTF-8 binary.
    pub fn charlist_to_binary(list: &Term) -> Result<Self, ConversionError> {
        let Term::List(list) = list else {
            return Err(ConversionError::NotAList(list.kind()));
        };
        if let Some(tail) = list.tail() {
            return Err(ConversionError::NotCharacter(tail.to_string()));
        }

        let mut text = String::with_capacity(list.len());
        for item in list.items() {
            let ch = match item {
                Term::Integer(code) => u32::try_from(code).ok().and_then(char::from_u32),
                _ => None,
            };
            match ch {
                Some(ch) => text.push(ch),
                None => return Err(ConversionError::NotCharacter(item.to_string())),
            }
        }

        Ok(Term::string(text))
    }

    pub fn kind(&self) -> TermKind {
        match self {
            Term::Atom(_) => TermKind::Atom,
            Term::Integer(_) => TermKind::Integer,
            Term::Float(_) => TermKind::Float,
            Term::Bitstring(_) => TermKind::Bitstring,
            Term::List(_) => TermKind::List,
            Term::Map(_) => TermKind::Map,
            Term::Tuple(_) => TermKind::Tuple,
            Term::Pid(_) => TermKind::Pid,
            Term::Port(_) => TermKind::Port,
            Term::Reference(_) => TermKind::Reference,
            Term::Function(_) => TermKind::AnonymousFunction,
        }
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Term::Atom(atom) if atom.name() == "nil" || atom.name() == "false")
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Term::Atom(atom) if atom.name() == "nil")
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            Term::Atom(atom) => Some(atom),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&BigInt> {
        match self {
            Term::Integer(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bitstring(&self) -> Option<&Bitstring> {
        match self {
            Term::Bitstring(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Term::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&Tuple> {
        match self {
            Term::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Term::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Term::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Term::Pid(handle) | Term::Port(handle) | Term::Reference(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Strict structural identity. Floats compare by bit pattern so that `0.0`
/// and `-0.0` stay distinct map keys.
impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Term::Atom(a), Term::Atom(b)) => a == b,
            (Term::Integer(a), Term::Integer(b)) => a == b,
            (Term::Float(a), Term::Float(b)) => a.to_bits() == b.to_bits(),
            (Term::Bitstring(a), Term::Bitstring(b)) => a == b,
            (Term::List(a), Term::List(b)) => a == b,
            (Term::Map(a), Term::Map(b)) => a == b,
            (Term::Tuple(a), Term::Tuple(b)) => a == b,
            (Term::Pid(a), Term::Pid(b))
            | (Term::Port(a), Term::Port(b))
            | (Term::Reference(a), Term::Reference(b)) => a == b,
            (Term::Function(a), Term::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Term {
    fn from(value: bool) -> Self {
        Term::boolean(value)
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::integer(value)
    }
}

impl From<BigInt> for Term {
    fn from(value: BigInt) -> Self {
        Term::Integer(value)
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Term::Float(value)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atoms_with_equal_names_are_equal() {
        assert_eq!(Term::atom("ok"), Term::atom(String::from("ok")));
        assert_ne!(Term::atom("ok"), Term::atom("error"));
    }

    #[test]
    fn integers_keep_values_beyond_machine_width() {
        let big: BigInt = "123456789012345678901234567890".parse().expect("bigint");
        let term = Term::integer(big.clone());
        assert_eq!(term.as_integer(), Some(&big));
    }

    #[test]
    fn floats_compare_by_bit_pattern() {
        assert_eq!(Term::float(1.5), Term::float(1.5));
        assert_ne!(Term::float(0.0), Term::float(-0.0));
        assert_ne!(Term::float(1.0), Term::integer(1));
    }

    #[test]
    fn improper_list_splices_list_tails() {
        let spliced = Term::improper_list([Term::integer(1)], Term::list([Term::integer(2)]))
            .expect("splice");
        assert_eq!(spliced, Term::list([Term::integer(1), Term::integer(2)]));

        let improper =
            Term::improper_list([Term::integer(1)], Term::integer(2)).expect("improper");
        let list = improper.as_list().expect("list");
        assert!(!list.is_proper());
        assert_eq!(list.tail(), Some(&Term::integer(2)));
    }

    #[test]
    fn improper_list_requires_a_head() {
        let err = Term::improper_list([], Term::integer(2)).expect_err("empty head");
        assert_eq!(err, ConversionError::EmptyImproperList);
    }

    #[test]
    fn keyword_list_builds_atom_keyed_pairs() {
        let kw = Term::keyword_list([("a", Term::integer(1))]);
        let list = kw.as_list().expect("list");
        let pair = list.items()[0].as_tuple().expect("tuple");
        assert_eq!(pair.arity(), 2);
        assert_eq!(pair.get(0), Some(&Term::atom("a")));
    }

    #[test]
    fn charlist_converts_code_points() {
        let charlist = Term::list("héllo".chars().map(|ch| Term::integer(ch as u32 as i64)));
        let binary = Term::charlist_to_binary(&charlist).expect("convert");
        assert_eq!(binary, Term::string("héllo"));
    }

    #[test]
    fn charlist_rejects_non_characters() {
        let charlist = Term::list([Term::integer(104), Term::atom("x")]);
        let err = Term::charlist_to_binary(&charlist).expect_err("atom element");
        assert_eq!(err, ConversionError::NotCharacter(":x".to_string()));

        let surrogate = Term::list([Term::integer(0xD800)]);
        assert!(Term::charlist_to_binary(&surrogate).is_err());
    }

    #[test]
    fn truthiness_follows_nil_and_false() {
        assert!(!Term::nil().is_truthy());
        assert!(!Term::boolean(false).is_truthy());
        assert!(Term::boolean(true).is_truthy());
        assert!(Term::integer(0).is_truthy());
    }

    #[test]
    fn handles_compare_origin_and_fields() {
        let a = Term::pid(Origin::Server, "nonode@nohost", vec![0, 11, 222]);
        let b = Term::pid(Origin::Server, "nonode@nohost", vec![0, 11, 222]);
        let c = Term::pid(Origin::Client, "nonode@nohost", vec![0, 11, 222]);
        let port = Term::port(Origin::Server, "nonode@nohost", vec![0, 11, 222]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, port);
    }

    #[test]
    fn kinds_name_wire_types() {
        assert_eq!(Term::reference(Origin::Server, "n", vec![1]).kind().as_str(), "reference");
        assert_eq!(
            Term::function_capture("Elixir.Enum", "map", 2).kind().as_str(),
            "anonymous_function"
        );
    }
}
