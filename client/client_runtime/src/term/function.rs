use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{Atom, ConversionError, Term};

type Closure = Arc<dyn Fn(&[Term]) -> Term + Send + Sync>;

/// Anonymous function value: either a capture of a named module function,
/// which can be described on the wire, or an opaque local closure.
#[derive(Clone)]
pub struct Function {
    arity: u8,
    body: Body,
}

#[derive(Clone)]
enum Body {
    Capture { module: Atom, function: Atom },
    Closure { id: Uuid, fun: Closure },
}

impl Function {
    pub fn capture(module: impl AsRef<str>, function: impl AsRef<str>, arity: u8) -> Self {
        Self {
            arity,
            body: Body::Capture {
                module: Atom::new(module),
                function: Atom::new(function),
            },
        }
    }

    pub fn closure<F>(arity: u8, fun: F) -> Self
    where
        F: Fn(&[Term]) -> Term + Send + Sync + 'static,
    {
        Self {
            arity,
            body: Body::Closure {
                id: Uuid::new_v4(),
                fun: Arc::new(fun),
            },
        }
    }

    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// `(module, function)` for a capture, `None` for a local closure.
    pub fn capture_target(&self) -> Option<(&Atom, &Atom)> {
        match &self.body {
            Body::Capture { module, function } => Some((module, function)),
            Body::Closure { .. } => None,
        }
    }

    pub fn closure_id(&self) -> Option<Uuid> {
        match &self.body {
            Body::Capture { .. } => None,
            Body::Closure { id, .. } => Some(*id),
        }
    }

    pub fn invoke(&self, args: &[Term]) -> Result<Term, ConversionError> {
        match &self.body {
            Body::Capture { module, function } => Err(ConversionError::NotInvocable(format!(
                "{module}.{function}/{}",
                self.arity
            ))),
            Body::Closure { fun, .. } => {
                if args.len() != usize::from(self.arity) {
                    return Err(ConversionError::ArityMismatch {
                        expected: self.arity,
                        actual: args.len(),
                    });
                }
                Ok(fun(args))
            }
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        if self.arity != other.arity {
            return false;
        }
        match (&self.body, &other.body) {
            (
                Body::Capture { module, function },
                Body::Capture {
                    module: other_module,
                    function: other_function,
                },
            ) => module == other_module && function == other_function,
            (Body::Closure { id, .. }, Body::Closure { id: other_id, .. }) => id == other_id,
            _ => false,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Body::Capture { module, function } => f
                .debug_struct("Function")
                .field("module", &module.name())
                .field("function", &function.name())
                .field("arity", &self.arity)
                .finish(),
            Body::Closure { id, .. } => f
                .debug_struct("Function")
                .field("closure", id)
                .field("arity", &self.arity)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_run_with_matching_arity() {
        let double = Function::closure(1, |args| match &args[0] {
            Term::Integer(value) => Term::integer(value + value),
            other => other.clone(),
        });
        assert_eq!(double.invoke(&[Term::integer(21)]), Ok(Term::integer(42)));
        assert_eq!(
            double.invoke(&[]),
            Err(ConversionError::ArityMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn captures_are_not_invoked_locally() {
        let capture = Function::capture("Elixir.Enum", "count", 1);
        assert!(matches!(
            capture.invoke(&[Term::list([])]),
            Err(ConversionError::NotInvocable(_))
        ));
    }

    #[test]
    fn closures_compare_by_identity() {
        let a = Function::closure(0, |_| Term::nil());
        let b = Function::closure(0, |_| Term::nil());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(
            Function::capture("Elixir.Enum", "count", 1),
            Function::capture("Elixir.Enum", "count", 1)
        );
    }
}
