//! This module defines the expression tree shared by the evaluator and the
//! compiler. An [`Expression`] is either an [`Atom`] (a literal or a symbol) or a
//! list of expressions; a list is a call form when evaluated and plain data when
//! quoted. Ergonomic helpers such as [`val`], [`sym`] and [`nil`] build trees in
//! code and tests, and `From` impls turn Rust literals, arrays and vectors into
//! expressions. Equality is structural and never coerces between atom kinds.

use crate::Error;

/// Integer atom payload
pub type IntType = i32;

/// Float atom payload
pub type FloatType = f32;

/// Allowed non-alphanumeric characters in symbol names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$%&";

/// Check if a string is a valid symbol name
/// Valid: non-empty, no leading digit, no "-digit" prefix, alphanumeric + SYMBOL_SPECIAL_CHARS
pub(crate) fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        None => false,
        Some(first_char) => {
            if first_char.is_ascii_digit() {
                return false;
            }

            if first_char == '-'
                && let Some(second_char) = chars.next()
                && second_char.is_ascii_digit()
            {
                return false;
            }

            name.chars()
                .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
        }
    }
}

/// Indivisible literal or symbol
#[derive(Debug, Clone)]
pub enum Atom {
    Int(IntType),
    Float(FloatType),
    String(String),
    Bool(bool),
    Symbol(String),
}

/// Structural equality. Floats compare by bit pattern, so a NaN equals itself.
impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Atom::Int(a), Atom::Int(b)) => a == b,
            (Atom::Float(a), Atom::Float(b)) => a.to_bits() == b.to_bits(),
            (Atom::String(a), Atom::String(b)) | (Atom::Symbol(a), Atom::Symbol(b)) => a == b,
            (Atom::Bool(a), Atom::Bool(b)) => a == b,
            _ => false,
        }
    }
}

/// Universal tree node
///
/// To build a tree, use the helper functions:
/// - `val(42)` for literals, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Atom(Atom),
    List(Vec<Expression>),
}

impl Expression {
    /// Symbol name if this is a symbol atom
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expression::Atom(Atom::Symbol(name)) => Some(name),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expression]> {
        match self {
            Expression::List(elements) => Some(elements),
            Expression::Atom(_) => None,
        }
    }

    /// Check if this is the empty list
    pub fn is_nil(&self) -> bool {
        matches!(self, Expression::List(list) if list.is_empty())
    }

    /// Short kind name used in type error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expression::Atom(Atom::Int(_)) => "int",
            Expression::Atom(Atom::Float(_)) => "float",
            Expression::Atom(Atom::String(_)) => "string",
            Expression::Atom(Atom::Bool(_)) => "bool",
            Expression::Atom(Atom::Symbol(_)) => "symbol",
            Expression::List(_) => "list",
        }
    }
}

impl From<Atom> for Expression {
    fn from(atom: Atom) -> Self {
        Expression::Atom(atom)
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Self {
        Expression::Atom(Atom::String(s.to_owned()))
    }
}

impl From<String> for Expression {
    fn from(s: String) -> Self {
        Expression::Atom(Atom::String(s))
    }
}

impl From<bool> for Expression {
    fn from(b: bool) -> Self {
        Expression::Atom(Atom::Bool(b))
    }
}

impl From<FloatType> for Expression {
    fn from(n: FloatType) -> Self {
        Expression::Atom(Atom::Float(n))
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Expression {
            fn from(n: $int_type) -> Self {
                Expression::Atom(Atom::Int(IntType::from(n)))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(IntType);
impl_from_integer!(u8);
impl_from_integer!(u16);

impl<T: Into<Expression>> From<Vec<T>> for Expression {
    fn from(v: Vec<T>) -> Self {
        Expression::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Expression>, const N: usize> From<[T; N]> for Expression {
    fn from(arr: [T; N]) -> Self {
        Expression::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

// Fallible conversions back into primitive Rust types, used by builtins.

impl TryFrom<&Expression> for IntType {
    type Error = Error;

    fn try_from(expr: &Expression) -> Result<IntType, Error> {
        if let Expression::Atom(Atom::Int(n)) = expr {
            Ok(*n)
        } else {
            Err(Error::TypeMismatch(format!(
                "expected int, got {}",
                expr.kind_name()
            )))
        }
    }
}

impl TryFrom<&Expression> for bool {
    type Error = Error;

    fn try_from(expr: &Expression) -> Result<bool, Error> {
        if let Expression::Atom(Atom::Bool(b)) = expr {
            Ok(*b)
        } else {
            Err(Error::TypeMismatch(format!(
                "expected bool, got {}",
                expr.kind_name()
            )))
        }
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Expression {
    Expression::Atom(Atom::Symbol(name.as_ref().to_owned()))
}

/// Helper function for creating expressions from anything convertible
pub fn val<T: Into<Expression>>(value: T) -> Expression {
    value.into()
}

/// Helper function for creating the empty list
pub fn nil() -> Expression {
    Expression::List(vec![])
}

/// A top-level form with the source line it starts on
#[derive(Debug, Clone, PartialEq)]
pub struct SourceForm {
    pub line: usize,
    pub expr: Expression,
}

impl SourceForm {
    pub fn new(line: usize, expr: Expression) -> Self {
        SourceForm { line, expr }
    }
}

/// One formal parameter of a `defun`/`defmacro`: a bare symbol or `(name type)`
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<String>,
}

/// Read the parameter list of a definition form
pub fn parse_parameters(form_name: &str, list: &Expression) -> Result<Vec<Parameter>, Error> {
    let Expression::List(items) = list else {
        return Err(Error::TypeMismatch(format!(
            "{form_name} parameters must be a list, got {}",
            list.kind_name()
        )));
    };

    let mut params: Vec<Parameter> = Vec::with_capacity(items.len());
    for item in items {
        let param = match item {
            Expression::Atom(Atom::Symbol(name)) => Parameter {
                name: name.clone(),
                annotation: None,
            },
            Expression::List(pair) => match pair.as_slice() {
                [Expression::Atom(Atom::Symbol(name)), Expression::Atom(Atom::Symbol(ty))] => {
                    Parameter {
                        name: name.clone(),
                        annotation: Some(ty.clone()),
                    }
                }
                _ => {
                    return Err(Error::TypeMismatch(format!(
                        "{form_name} annotated parameter must be (name type)"
                    )));
                }
            },
            other => {
                return Err(Error::TypeMismatch(format!(
                    "{form_name} parameters must be symbols, got {}",
                    other.kind_name()
                )));
            }
        };
        if params.iter().any(|p| p.name == param.name) {
            return Err(Error::EvalError(format!(
                "{form_name}: duplicate parameter name {}",
                param.name
            )));
        }
        params.push(param);
    }
    Ok(params)
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Atom::Int(n) => write!(f, "{n}"),
            // Debug formatting keeps the decimal point on whole floats
            Atom::Float(n) => write!(f, "{n:?}"),
            Atom::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Atom::Bool(b) => write!(f, "{b}"),
            Atom::Symbol(s) => write!(f, "{s}"),
        }
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Atom(atom) => write!(f, "{atom}"),
            Expression::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        let test_cases = vec![
            (val(42), Expression::Atom(Atom::Int(42))),
            (val(-17), Expression::Atom(Atom::Int(-17))),
            (val(255u8), Expression::Atom(Atom::Int(255))),
            (val(-32768i16), Expression::Atom(Atom::Int(-32768))),
            (val(IntType::MAX), Expression::Atom(Atom::Int(IntType::MAX))),
            (val(2.5f32), Expression::Atom(Atom::Float(2.5))),
            (val(true), Expression::Atom(Atom::Bool(true))),
            (val("hello"), Expression::Atom(Atom::String("hello".to_owned()))),
            (sym("foo-bar?"), Expression::Atom(Atom::Symbol("foo-bar?".to_owned()))),
            (nil(), Expression::List(vec![])),
            (
                val([1, 2, 3]),
                Expression::List(vec![val(1), val(2), val(3)]),
            ),
            (
                val(vec![sym("op"), val(42), val("result")]),
                Expression::List(vec![
                    Expression::Atom(Atom::Symbol("op".to_owned())),
                    Expression::Atom(Atom::Int(42)),
                    Expression::Atom(Atom::String("result".to_owned())),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "Test case {} failed", i + 1);
        }
    }

    #[test]
    fn test_structural_equality() {
        let a = val(vec![sym("f"), val([1, 2]), val("x")]);
        let b = val(vec![sym("f"), val([1, 2]), val("x")]);
        assert_eq!(a, a.clone());
        assert_eq!(a, b);
        assert_eq!(b, a);
        // No cross-kind coercion
        assert_ne!(val(3), val(3.0f32));
        assert_ne!(sym("x"), val("x"));
        assert_ne!(val([1, 2]), val([1, 2, 3]));

        // Reflexive for every float, NaN included
        let nan = val(FloatType::NAN);
        assert_eq!(nan, nan.clone());
        assert_eq!(val(vec![nan.clone(), val(1)]), val(vec![nan, val(1)]));
        assert_eq!(val(FloatType::INFINITY), val(FloatType::INFINITY));
        assert_ne!(val(FloatType::NAN), val(FloatType::INFINITY));
    }

    #[test]
    fn test_display() {
        let cases = vec![
            (val(5), "5"),
            (val(5.0f32), "5.0"),
            (val(-0.5f32), "-0.5"),
            (val(true), "true"),
            (val("a \"q\"\n"), r#""a \"q\"\n""#),
            (nil(), "()"),
            (val(vec![sym("+"), val(1), val(vec![sym("f")])]), "(+ 1 (f))"),
        ];
        for (expr, expected) in cases {
            assert_eq!(expr.to_string(), expected);
        }
    }

    #[test]
    fn test_valid_symbols() {
        let cases = vec![
            ("foo", true),
            ("+", true),
            ("-", true),
            ("-abc", true),
            ("set!", true),
            ("a_b", true),
            ("", false),
            ("1abc", false),
            ("-1", false),
            ("a b", false),
            ("a#b", false),
        ];
        for (name, expected) in cases {
            assert_eq!(is_valid_symbol(name), expected, "symbol {name:?}");
        }
    }

    #[test]
    fn test_parse_parameters() {
        let params = parse_parameters("defun", &val(vec![sym("a"), val(vec![sym("b"), sym("float")])]));
        assert_eq!(
            params,
            Ok(vec![
                Parameter {
                    name: "a".into(),
                    annotation: None
                },
                Parameter {
                    name: "b".into(),
                    annotation: Some("float".into())
                },
            ])
        );

        assert!(matches!(
            parse_parameters("defun", &val(vec![sym("a"), sym("a")])),
            Err(Error::EvalError(_))
        ));
        assert!(matches!(
            parse_parameters("defun", &val(vec![val(1)])),
            Err(Error::TypeMismatch(_))
        ));
        assert!(matches!(
            parse_parameters("defun", &sym("x")),
            Err(Error::TypeMismatch(_))
        ));
    }
}
