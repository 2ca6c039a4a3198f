use std::fmt::{self, Display, Formatter, Write as _};

use super::{Atom, Bitstring, Handle, Term};

/// Renders terms the way the remote runtime's `inspect` would, for log lines.
impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(atom) => write_atom(f, atom),
            Term::Integer(value) => write!(f, "{value}"),
            Term::Float(value) => write!(f, "{value:?}"),
            Term::Bitstring(bits) => write_bitstring(f, bits),
            Term::List(list) => {
                f.write_char('[')?;
                write_seq(f, list.items())?;
                if let Some(tail) = list.tail() {
                    write!(f, " | {tail}")?;
                }
                f.write_char(']')
            }
            Term::Tuple(tuple) => {
                f.write_char('{')?;
                write_seq(f, tuple.elements())?;
                f.write_char('}')
            }
            Term::Map(map) => {
                f.write_str("%{")?;
                for (index, (key, value)) in map.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key} => {value}")?;
                }
                f.write_char('}')
            }
            Term::Pid(handle) => write_handle(f, "PID", handle),
            Term::Port(handle) => write_handle(f, "Port", handle),
            Term::Reference(handle) => write_handle(f, "Reference", handle),
            Term::Function(function) => match function.capture_target() {
                Some((module, name)) => {
                    write!(f, "&{}.{}/{}", module_name(module), name, function.arity())
                }
                None => write!(f, "#Function<{}>", function.arity()),
            },
        }
    }
}

fn write_seq(f: &mut Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_atom(f: &mut Formatter<'_>, atom: &Atom) -> fmt::Result {
    let name = atom.name();
    if matches!(name, "nil" | "true" | "false") {
        return f.write_str(name);
    }
    if let Some(alias) = name.strip_prefix("Elixir.") {
        return f.write_str(alias);
    }
    if is_plain_identifier(name) {
        write!(f, ":{name}")
    } else {
        write!(f, ":{name:?}")
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first == '_')
        && name
            .trim_end_matches(['?', '!'])
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '@')
}

fn module_name(module: &Atom) -> &str {
    module
        .name()
        .strip_prefix("Elixir.")
        .unwrap_or(module.name())
}

fn write_bitstring(f: &mut Formatter<'_>, bits: &Bitstring) -> fmt::Result {
    if let Some(text) = bits.text() {
        return write!(f, "{text:?}");
    }

    f.write_str("<<")?;
    let bytes = bits.bytes();
    let rem = bits.bit_len() % 8;
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        if rem != 0 && index == bytes.len() - 1 {
            write!(f, "{}::size({rem})", byte >> (8 - rem))?;
        } else {
            write!(f, "{byte}")?;
        }
    }
    f.write_str(">>")
}

fn write_handle(f: &mut Formatter<'_>, label: &str, handle: &Handle) -> fmt::Result {
    write!(f, "#{label}<")?;
    for (index, segment) in handle.segments().iter().enumerate() {
        if index > 0 {
            f.write_char('.')?;
        }
        write!(f, "{segment}")?;
    }
    f.write_char('>')
}

#[cfg(test)]
mod tests {
    use super::super::Origin;
    use super::*;

    #[test]
    fn renders_scalars() {
        assert_eq!(Term::atom("ok").to_string(), ":ok");
        assert_eq!(Term::atom("hello world").to_string(), r#":"hello world""#);
        assert_eq!(Term::atom("Elixir.MyApp.Page").to_string(), "MyApp.Page");
        assert_eq!(Term::nil().to_string(), "nil");
        assert_eq!(Term::integer(-7).to_string(), "-7");
        assert_eq!(Term::float(1.0).to_string(), "1.0");
        assert_eq!(Term::string("hi").to_string(), r#""hi""#);
    }

    #[test]
    fn renders_non_binary_bitstrings() {
        let bits = Term::bitstring(11, vec![0xFF, 0b1010_0000]).expect("bits");
        assert_eq!(bits.to_string(), "<<255, 5::size(3)>>");
    }

    #[test]
    fn renders_composites() {
        let improper = Term::improper_list([Term::integer(1)], Term::integer(2)).expect("list");
        assert_eq!(improper.to_string(), "[1 | 2]");
        assert_eq!(
            Term::tuple([Term::atom("ok"), Term::string("x")]).to_string(),
            r#"{:ok, "x"}"#
        );
        assert_eq!(
            Term::map([(Term::atom("a"), Term::integer(1))]).to_string(),
            "%{:a => 1}"
        );
    }

    #[test]
    fn renders_handles_and_functions() {
        assert_eq!(
            Term::pid(Origin::Server, "nonode@nohost", vec![0, 11, 222]).to_string(),
            "#PID<0.11.222>"
        );
        assert_eq!(
            Term::function_capture("Elixir.Enum", "map", 2).to_string(),
            "&Enum.map/2"
        );
        assert_eq!(
            Term::anonymous_function(1, |args| args[0].clone()).to_string(),
            "#Function<1>"
        );
    }
}
