//! Built-in operations registry.
//!
//! Every builtin is described once by a [`BuiltinOp`] and installed into the
//! global frame by [`create_global_env`]. There are two kinds:
//!
//! - **Functions** receive their operands already evaluated (`+`, `eq`, `print`)
//! - **Macros** receive the raw call form, operator included, and decide what to
//!   evaluate themselves (`if`, `set`, `defun`, `quote`)
//!
//! ```text
//! (+ 1 2.5)               ; 3.5, any float operand promotes the result
//! (if (< 1 2) "a" "b")    ; only the taken branch runs
//! (defun sq (x) (* x x))  ; returns the symbol sq
//! ```
//!
//! Arity always counts operands, never the operator, and is validated before
//! any operand is evaluated.
//!
//! ## Type strictness
//!
//! - Arithmetic and comparison accept only `Int` and `Float`
//! - `if` and `not` accept only `Bool`, there is no truthiness
//! - `eq` is structural and never coerces between kinds
//! - Integer overflow is an error rather than wrapping

use crate::Error;
use crate::ast::{Atom, Expression, FloatType, IntType, nil, parse_parameters, sym, val};
use crate::environment::{Binding, Environment, ScriptCallable};
use crate::evaluator::Evaluator;
use std::rc::Rc;
use tracing::debug;

/// Accepted operand counts for a callable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    /// Check `got` operands against this arity for the operation `name`
    pub fn validate(&self, name: &str, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_mismatch(name, *self, got))
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

type FunctionImpl = fn(&mut Evaluator, &Environment, Vec<Expression>) -> Result<Expression, Error>;
type MacroImpl = fn(&mut Evaluator, &Environment, &[Expression]) -> Result<Expression, Error>;

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Takes evaluated operands
    Function(FunctionImpl),
    /// Takes the unevaluated call form, operator included
    Macro(MacroImpl),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::Macro(_) => write!(f, "Macro(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    pub name: &'static str,
    pub op_kind: OpKind,
    /// Expected number of operands
    pub arity: Arity,
}

impl BuiltinOp {
    pub fn is_macro(&self) -> bool {
        matches!(self.op_kind, OpKind::Macro(_))
    }
}

//
// Numeric helpers
//

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(IntType),
    Float(FloatType),
}

impl Number {
    fn from_expr(op: &str, expr: &Expression) -> Result<Self, Error> {
        match expr {
            Expression::Atom(Atom::Int(n)) => Ok(Number::Int(*n)),
            Expression::Atom(Atom::Float(x)) => Ok(Number::Float(*x)),
            other => Err(Error::TypeMismatch(format!(
                "{op} expects numbers, got {}",
                other.kind_name()
            ))),
        }
    }

    fn as_float(self) -> FloatType {
        match self {
            // Widening for mixed arithmetic
            Number::Int(n) => n as FloatType,
            Number::Float(x) => x,
        }
    }

    fn into_expr(self) -> Expression {
        match self {
            Number::Int(n) => val(n),
            Number::Float(x) => val(x),
        }
    }
}

/// Left fold over numeric operands. Stays integral until a float appears.
fn fold_numbers(
    op: &str,
    verb: &str,
    init: Number,
    operands: &[Expression],
    int_op: fn(IntType, IntType) -> Option<IntType>,
    float_op: fn(FloatType, FloatType) -> FloatType,
) -> Result<Number, Error> {
    let mut acc = init;
    for operand in operands {
        let next = Number::from_expr(op, operand)?;
        acc = match (acc, next) {
            (Number::Int(a), Number::Int(b)) => Number::Int(
                int_op(a, b)
                    .ok_or_else(|| Error::EvalError(format!("Integer overflow in {verb}")))?,
            ),
            (a, b) => Number::Float(float_op(a.as_float(), b.as_float())),
        };
    }
    Ok(acc)
}

fn compare_numbers(
    op: &str,
    args: &[Expression],
    int_cmp: fn(&IntType, &IntType) -> bool,
    float_cmp: fn(&FloatType, &FloatType) -> bool,
) -> Result<Expression, Error> {
    let [left, right] = args else {
        return Err(Error::arity_mismatch(op, Arity::Exact(2), args.len()));
    };
    let result = match (Number::from_expr(op, left)?, Number::from_expr(op, right)?) {
        (Number::Int(a), Number::Int(b)) => int_cmp(&a, &b),
        (a, b) => float_cmp(&a.as_float(), &b.as_float()),
    };
    Ok(val(result))
}

//
// Builtin function implementations
//

fn builtin_add(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    fold_numbers(
        "+",
        "addition",
        Number::Int(0),
        &args,
        IntType::checked_add,
        |a, b| a + b,
    )
    .map(Number::into_expr)
}

fn builtin_mul(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    fold_numbers(
        "*",
        "multiplication",
        Number::Int(1),
        &args,
        IntType::checked_mul,
        |a, b| a * b,
    )
    .map(Number::into_expr)
}

fn builtin_sub(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    let [first, rest @ ..] = args.as_slice() else {
        return Err(Error::arity_mismatch("-", Arity::AtLeast(1), 0));
    };
    let first = Number::from_expr("-", first)?;

    if rest.is_empty() {
        return match first {
            Number::Int(n) => n
                .checked_neg()
                .map(val)
                .ok_or_else(|| Error::EvalError("Integer overflow in negation".into())),
            Number::Float(x) => Ok(val(-x)),
        };
    }

    fold_numbers(
        "-",
        "subtraction",
        first,
        rest,
        IntType::checked_sub,
        |a, b| a - b,
    )
    .map(Number::into_expr)
}

fn builtin_lt(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    compare_numbers("<", &args, IntType::lt, FloatType::lt)
}

fn builtin_gt(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    compare_numbers(">", &args, IntType::gt, FloatType::gt)
}

fn builtin_eq(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    // Structural equality; Int 3 and Float 3.0 are different kinds
    match args.as_slice() {
        [left, right] => Ok(val(left == right)),
        _ => Err(Error::arity_mismatch("eq", Arity::Exact(2), args.len())),
    }
}

fn builtin_not(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    match args.as_slice() {
        [arg] => Ok(val(!bool::try_from(arg)?)),
        _ => Err(Error::arity_mismatch("not", Arity::Exact(1), args.len())),
    }
}

fn builtin_list(_: &mut Evaluator, _: &Environment, args: Vec<Expression>) -> Result<Expression, Error> {
    Ok(Expression::List(args))
}

fn builtin_print(
    evaluator: &mut Evaluator,
    _: &Environment,
    mut args: Vec<Expression>,
) -> Result<Expression, Error> {
    let line = args
        .iter()
        .map(|arg| match arg {
            Expression::Atom(Atom::String(s)) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    evaluator.write_line(&line)?;
    Ok(args.pop().unwrap_or_else(nil))
}

//
// Builtin macro implementations. `form[0]` is the operator symbol and arity
// has been validated by the evaluator.
//

fn symbol_operand<'a>(op: &str, expr: &'a Expression) -> Result<&'a str, Error> {
    expr.as_symbol().ok_or_else(|| {
        Error::TypeMismatch(format!("{op} expects a symbol name, got {}", expr.kind_name()))
    })
}

fn eval_quote(_: &mut Evaluator, _: &Environment, form: &[Expression]) -> Result<Expression, Error> {
    match form {
        [_, quoted] => Ok(quoted.clone()),
        _ => Err(Error::arity_mismatch("quote", Arity::Exact(1), form.len().saturating_sub(1))),
    }
}

fn eval_if(
    evaluator: &mut Evaluator,
    env: &Environment,
    form: &[Expression],
) -> Result<Expression, Error> {
    let (condition, then_branch, else_branch) = match form {
        [_, condition, then_branch] => (condition, then_branch, None),
        [_, condition, then_branch, else_branch] => (condition, then_branch, Some(else_branch)),
        _ => {
            return Err(Error::arity_mismatch(
                "if",
                Arity::Range(2, 3),
                form.len().saturating_sub(1),
            ));
        }
    };

    let value = evaluator.eval(env, condition)?;
    let Expression::Atom(Atom::Bool(taken)) = value else {
        return Err(Error::TypeMismatch(format!(
            "if condition must be a bool, got {}",
            value.kind_name()
        )));
    };

    if taken {
        evaluator.eval(env, then_branch)
    } else if let Some(else_branch) = else_branch {
        evaluator.eval(env, else_branch)
    } else {
        Ok(nil())
    }
}

fn eval_set(
    evaluator: &mut Evaluator,
    env: &Environment,
    form: &[Expression],
) -> Result<Expression, Error> {
    let [_, target, value_expr] = form else {
        return Err(Error::arity_mismatch("set", Arity::Exact(2), form.len().saturating_sub(1)));
    };
    let name = symbol_operand("set", target)?;
    let value = evaluator.eval(env, value_expr)?;
    env.assign(name, value.clone());
    Ok(value)
}

/// Shared by `defun` and `defmacro`: `(op name (params...) body...)`
fn parse_definition(env: &Environment, form: &[Expression]) -> Result<ScriptCallable, Error> {
    let [op, name, params, body @ ..] = form else {
        return Err(Error::EvalError("malformed definition".into()));
    };
    let op = op.as_symbol().unwrap_or("defun");
    if body.is_empty() {
        return Err(Error::arity_mismatch(op, Arity::AtLeast(3), form.len() - 1));
    }
    let name = symbol_operand(op, name)?;
    // Type annotations are compiler hints only
    let params = parse_parameters(op, params)?
        .into_iter()
        .map(|param| param.name)
        .collect();

    Ok(ScriptCallable {
        name: name.to_owned(),
        params,
        body: body.to_vec(),
        closure: env.clone(),
    })
}

fn eval_defun(_: &mut Evaluator, env: &Environment, form: &[Expression]) -> Result<Expression, Error> {
    let function = parse_definition(env, form)?;
    debug!(name = %function.name, params = ?function.params, "defined script function");
    let name = function.name.clone();
    env.add(name.as_str(), Binding::ScriptFunction(Rc::new(function)));
    Ok(sym(name))
}

fn eval_defmacro(
    _: &mut Evaluator,
    env: &Environment,
    form: &[Expression],
) -> Result<Expression, Error> {
    let script_macro = parse_definition(env, form)?;
    debug!(name = %script_macro.name, params = ?script_macro.params, "defined script macro");
    let name = script_macro.name.clone();
    env.add(name.as_str(), Binding::ScriptMacro(Rc::new(script_macro)));
    Ok(sym(name))
}

/// One expansion step when `form` is a call to a script macro
fn expand_once(
    evaluator: &mut Evaluator,
    env: &Environment,
    form: &Expression,
) -> Result<Option<Expression>, Error> {
    let Some([head, args @ ..]) = form.as_list() else {
        return Ok(None);
    };
    let Some(Binding::ScriptMacro(script_macro)) =
        head.as_symbol().and_then(|name| env.lookup(name).ok())
    else {
        return Ok(None);
    };
    let mut expansions = evaluator.expand_macro_call(env, &script_macro, args)?;
    Ok(Some(expansions.pop().unwrap_or_else(nil)))
}

fn eval_macroexpand(
    evaluator: &mut Evaluator,
    env: &Environment,
    form: &[Expression],
) -> Result<Expression, Error> {
    let [_, target] = form else {
        return Err(Error::arity_mismatch(
            "macroexpand",
            Arity::Exact(1),
            form.len().saturating_sub(1),
        ));
    };

    // Both (macroexpand (m ...)) and (macroexpand '(m ...)) are accepted
    let mut current = match target.as_list() {
        Some([head, quoted]) if head.as_symbol() == Some("quote") => quoted.clone(),
        _ => target.clone(),
    };

    let limit = evaluator.max_depth();
    for _ in 0..limit {
        match expand_once(evaluator, env, &current)? {
            Some(next) => current = next,
            None => return Ok(current),
        }
    }
    Err(Error::EvalError(format!(
        "macroexpand did not reach a fixed point within {limit} steps"
    )))
}

/// Global registry of all built-in operations
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic
    BuiltinOp {
        name: "+",
        op_kind: OpKind::Function(builtin_add),
        arity: Arity::Any,
    },
    BuiltinOp {
        name: "-",
        op_kind: OpKind::Function(builtin_sub),
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        name: "*",
        op_kind: OpKind::Function(builtin_mul),
        arity: Arity::Any,
    },
    // Comparison
    BuiltinOp {
        name: "<",
        op_kind: OpKind::Function(builtin_lt),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        name: ">",
        op_kind: OpKind::Function(builtin_gt),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        name: "eq",
        op_kind: OpKind::Function(builtin_eq),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        name: "not",
        op_kind: OpKind::Function(builtin_not),
        arity: Arity::Exact(1),
    },
    // Data and output
    BuiltinOp {
        name: "list",
        op_kind: OpKind::Function(builtin_list),
        arity: Arity::Any,
    },
    BuiltinOp {
        name: "print",
        op_kind: OpKind::Function(builtin_print),
        arity: Arity::Any,
    },
    // Macros
    BuiltinOp {
        name: "quote",
        op_kind: OpKind::Macro(eval_quote),
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        name: "if",
        op_kind: OpKind::Macro(eval_if),
        arity: Arity::Range(2, 3),
    },
    BuiltinOp {
        name: "set",
        op_kind: OpKind::Macro(eval_set),
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        name: "defun",
        op_kind: OpKind::Macro(eval_defun),
        arity: Arity::AtLeast(3),
    },
    BuiltinOp {
        name: "defmacro",
        op_kind: OpKind::Macro(eval_defmacro),
        arity: Arity::AtLeast(3),
    },
    BuiltinOp {
        name: "macroexpand",
        op_kind: OpKind::Macro(eval_macroexpand),
        arity: Arity::Exact(1),
    },
];

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin operation by name
pub fn find_builtin_op(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_OPS.iter().find(|op| op.name == name)
}

/// Create a global environment with every builtin installed
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for op in get_builtin_ops() {
        match op.op_kind {
            OpKind::Function(func) => env.register_native_function_with_arity(op.name, op.arity, func),
            OpKind::Macro(func) => env.register_native_macro_with_arity(op.name, op.arity, func),
        }
    }
    env
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;

    fn success<T: Into<Expression>>(value: T) -> Option<Expression> {
        Some(val(value))
    }

    /// Invoke a builtin function directly through the registry
    fn call_builtin(name: &str, args: &[Expression]) -> Result<Expression, Error> {
        let op = find_builtin_op(name).unwrap();
        op.arity.validate(name, args.len())?;
        let OpKind::Function(func) = op.op_kind else {
            panic!("expected function builtin in tests, got macro: {name}");
        };
        let mut evaluator = Evaluator::new().with_output(std::io::sink());
        func(&mut evaluator, &Environment::new(), args.to_vec())
    }

    #[test]
    fn test_builtin_ops_registry() {
        let cases = vec![
            ("+", false, Arity::Any),
            ("-", false, Arity::AtLeast(1)),
            ("eq", false, Arity::Exact(2)),
            ("print", false, Arity::Any),
            ("if", true, Arity::Range(2, 3)),
            ("set", true, Arity::Exact(2)),
            ("defun", true, Arity::AtLeast(3)),
            ("defmacro", true, Arity::AtLeast(3)),
            ("quote", true, Arity::Exact(1)),
            ("macroexpand", true, Arity::Exact(1)),
        ];
        for (name, is_macro, arity) in cases {
            let op = find_builtin_op(name).unwrap();
            assert_eq!(op.is_macro(), is_macro, "{name}");
            assert_eq!(op.arity, arity, "{name}");
        }
        assert!(find_builtin_op("unknown").is_none());

        // Names are unique
        let ops = get_builtin_ops();
        for (i, op) in ops.iter().enumerate() {
            assert!(
                ops[i + 1..].iter().all(|other| other.name != op.name),
                "duplicate builtin {}",
                op.name
            );
        }

        // Everything lands in the global frame with the right binding kind
        let env = create_global_env();
        for op in ops {
            let binding = env.lookup(op.name).unwrap();
            assert_eq!(binding.is_macro(), op.is_macro(), "{}", op.name);
        }
    }

    #[test]
    fn test_arity_validation() {
        let cases = vec![
            (Arity::Exact(2), 2, true),
            (Arity::Exact(2), 1, false),
            (Arity::Exact(0), 0, true),
            (Arity::AtLeast(1), 0, false),
            (Arity::AtLeast(1), 5, true),
            (Arity::Range(2, 3), 1, false),
            (Arity::Range(2, 3), 2, true),
            (Arity::Range(2, 3), 3, true),
            (Arity::Range(2, 3), 4, false),
            (Arity::Any, 0, true),
            (Arity::Any, 100, true),
        ];
        for (i, (arity, got, ok)) in cases.into_iter().enumerate() {
            let result = arity.validate("op", got);
            assert_eq!(result.is_ok(), ok, "case #{}: {arity:?} with {got}", i + 1);
            if let Err(err) = result {
                assert_eq!(err, Error::arity_mismatch("op", arity, got));
            }
        }
    }

    #[test]
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Vec<Expression>, Option<Expression>);

        let test_cases: Vec<TestCase> = vec![
            // Arithmetic
            ("+", vec![], success(0)),
            ("+", vec![val(1), val(2), val(3)], success(6)),
            ("+", vec![val(-5), val(5)], success(0)),
            ("+", vec![val(2.0f32), val(3)], success(5.0f32)),
            ("+", vec![val(1), val(0.5f32), val(1)], success(2.5f32)),
            ("+", vec![val(IntType::MAX), val(1)], None),
            ("+", vec![val("a")], None),
            ("+", vec![val(1), val(true)], None),
            ("*", vec![], success(1)),
            ("*", vec![val(6), val(7)], success(42)),
            ("*", vec![val(2), val(0.25f32)], success(0.5f32)),
            ("*", vec![val(IntType::MAX), val(2)], None),
            ("-", vec![val(5)], success(-5)),
            ("-", vec![val(0.5f32)], success(-0.5f32)),
            ("-", vec![val(IntType::MIN)], None),
            ("-", vec![val(10), val(3), val(2)], success(5)),
            ("-", vec![val(1), val(0.5f32)], success(0.5f32)),
            ("-", vec![val(IntType::MIN), val(1)], None),
            ("-", vec![], None),
            // Comparison
            ("<", vec![val(1), val(2)], success(true)),
            ("<", vec![val(2), val(2)], success(false)),
            ("<", vec![val(1), val(1.5f32)], success(true)),
            (">", vec![val(3), val(2)], success(true)),
            (">", vec![val(2.5f32), val(3)], success(false)),
            (">", vec![val(1)], None),
            ("<", vec![val("a"), val("b")], None),
            // Equality
            ("eq", vec![val(3), val(3)], success(true)),
            ("eq", vec![val(3), val(3.0f32)], success(false)),
            ("eq", vec![val("a"), val("a")], success(true)),
            ("eq", vec![val([1, 2]), val([1, 2])], success(true)),
            ("eq", vec![val([1, 2]), val([2, 1])], success(false)),
            ("eq", vec![nil(), nil()], success(true)),
            ("eq", vec![sym("a"), val("a")], success(false)),
            ("eq", vec![val(FloatType::NAN), val(FloatType::NAN)], success(true)),
            ("eq", vec![val(0.0f32), val(-0.0f32)], success(false)),
            ("eq", vec![val(1)], None),
            // Logic and lists
            ("not", vec![val(true)], success(false)),
            ("not", vec![val(false)], success(true)),
            ("not", vec![val(0)], None),
            ("list", vec![], Some(nil())),
            ("list", vec![val(1), val("x")], success(vec![val(1), val("x")])),
            // print returns its last operand
            ("print", vec![val(1), val("x")], success("x")),
            ("print", vec![], Some(nil())),
        ];

        for (i, (name, args, expected)) in test_cases.into_iter().enumerate() {
            let result = call_builtin(name, &args);
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "case #{} ({name} {args:?})", i + 1);
                }
                (Err(_), None) => {}
                (Ok(actual), None) => {
                    panic!("case #{} ({name} {args:?}): expected error, got {actual}", i + 1)
                }
                (Err(err), Some(expected)) => {
                    panic!("case #{} ({name} {args:?}): expected {expected}, got {err}", i + 1)
                }
            }
        }
    }

    #[test]
    fn test_overflow_is_eval_error() {
        let err = call_builtin("+", &[val(IntType::MAX), val(1)]).unwrap_err();
        assert!(matches!(err, Error::EvalError(msg) if msg.contains("overflow")));
        let err = call_builtin("+", &[val(true)]).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_macros_without_reader() {
        let env = create_global_env();
        let mut evaluator = Evaluator::new().with_output(std::io::sink());

        // (defun double (x) (+ x x))
        let defun = val(vec![
            sym("defun"),
            sym("double"),
            val(vec![sym("x")]),
            val(vec![sym("+"), sym("x"), sym("x")]),
        ]);
        assert_eq!(evaluator.eval(&env, &defun).unwrap(), sym("double"));
        let call = val(vec![sym("double"), val(21)]);
        assert_eq!(evaluator.eval(&env, &call).unwrap(), val(42));

        // Annotated parameters are accepted and ignored by the evaluator
        let typed = val(vec![
            sym("defun"),
            sym("half"),
            val(vec![val(vec![sym("x"), sym("float")])]),
            val(vec![sym("*"), sym("x"), val(0.5f32)]),
        ]);
        evaluator.eval(&env, &typed).unwrap();
        let call = val(vec![sym("half"), val(3.0f32)]);
        assert_eq!(evaluator.eval(&env, &call).unwrap(), val(1.5f32));

        // Duplicate parameter names are rejected
        let duplicate = val(vec![
            sym("defun"),
            sym("bad"),
            val(vec![sym("x"), sym("x")]),
            sym("x"),
        ]);
        assert!(evaluator.eval(&env, &duplicate).is_err());
        assert!(env.lookup("bad").is_err());

        // Non-symbol names
        let unnamed = val(vec![sym("defmacro"), val(1), nil(), val(1)]);
        assert!(matches!(
            evaluator.eval(&env, &unnamed),
            Err(Error::TypeMismatch(_))
        ));
    }
}
