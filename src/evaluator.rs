//! Tree-walking evaluation.
//!
//! [`Evaluator::eval`] interprets an [`Expression`] against an [`Environment`].
//! Literals and the empty list evaluate to themselves, symbols resolve to the
//! value held by a `Variable` binding, and a non-empty list is a call whose head
//! symbol selects one of four dispatch paths:
//!
//! - native function: arguments are evaluated left to right, then passed in
//! - native macro: the raw call form is passed in untouched
//! - script function: arguments are evaluated in the caller's frame and bound in
//!   a fresh frame chained to the function's closure frame
//! - script macro: raw arguments are bound in a frame chained to the caller's
//!   frame, the body is expanded by substitution, and the expansion is evaluated
//!   at the call site
//!
//! Macro parameters are substituted without renaming, so a macro body can
//! capture or clobber names visible at the call site.

use crate::ast::{Atom, Expression, SourceForm, nil};
use crate::builtins::Arity;
use crate::environment::{Binding, Environment, ScriptCallable};
use crate::{Diagnostic, Error, MAX_EVAL_DEPTH};
use std::io::Write;
use tracing::trace;

/// Interpreter state threaded through every evaluation and native call
pub struct Evaluator {
    depth: usize,
    max_depth: usize,
    output: Box<dyn Write>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            depth: 0,
            max_depth: MAX_EVAL_DEPTH,
            output: Box::new(std::io::stdout()),
        }
    }

    /// Override the nested evaluation limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Redirect `print` output
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Write one line to the configured output
    pub fn write_line(&mut self, line: &str) -> Result<(), Error> {
        writeln!(self.output, "{line}")
            .and_then(|()| self.output.flush())
            .map_err(|e| Error::EvalError(format!("output failed: {e}")))
    }

    /// Evaluate one expression
    pub fn eval(&mut self, env: &Environment, expr: &Expression) -> Result<Expression, Error> {
        if self.depth >= self.max_depth {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.max_depth
            )));
        }
        self.depth += 1;
        let result = self.eval_inner(env, expr);
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, env: &Environment, expr: &Expression) -> Result<Expression, Error> {
        match expr {
            Expression::Atom(Atom::Symbol(name)) => match env.lookup(name)? {
                Binding::Variable { value, .. } => Ok(value),
                _ => Err(Error::NotAVariable(name.clone())),
            },
            // Self-evaluating literals
            Expression::Atom(_) => Ok(expr.clone()),
            // The empty list is data, not a call
            Expression::List(elements) if elements.is_empty() => Ok(expr.clone()),
            Expression::List(elements) => self
                .eval_call(env, elements)
                .map_err(|err| add_context(err, expr)),
        }
    }

    /// Evaluate a sequence, returning the last value (or `()` for an empty body)
    pub fn eval_body(
        &mut self,
        env: &Environment,
        body: &[Expression],
    ) -> Result<Expression, Error> {
        let mut result = nil();
        for expr in body {
            result = self.eval(env, expr)?;
        }
        Ok(result)
    }

    /// Evaluate top-level forms in order. A failing form is reported and the
    /// remaining forms still run.
    pub fn eval_forms(
        &mut self,
        env: &Environment,
        forms: &[SourceForm],
    ) -> Vec<Result<Expression, Diagnostic>> {
        forms
            .iter()
            .map(|form| {
                self.eval(env, &form.expr)
                    .map_err(|err| Diagnostic::from_error(&err, form.line))
            })
            .collect()
    }

    fn eval_args(
        &mut self,
        env: &Environment,
        args: &[Expression],
    ) -> Result<Vec<Expression>, Error> {
        args.iter().map(|arg| self.eval(env, arg)).collect()
    }

    fn eval_call(&mut self, env: &Environment, elements: &[Expression]) -> Result<Expression, Error> {
        let [head, args @ ..] = elements else {
            return Ok(nil());
        };
        let name = head
            .as_symbol()
            .ok_or_else(|| Error::NotCallable(head.to_string()))?;

        match env.lookup(name)? {
            Binding::NativeFunction { arity, func, .. } => {
                trace!(name, "native function call");
                arity.validate(name, args.len())?;
                let args = self.eval_args(env, args)?;
                func(self, env, args)
            }
            Binding::NativeMacro { arity, func, .. } => {
                trace!(name, "native macro call");
                arity.validate(name, args.len())?;
                func(self, env, elements)
            }
            Binding::ScriptFunction(function) => {
                trace!(name, "script function call");
                self.call_function(env, &function, args)
            }
            Binding::ScriptMacro(script_macro) => {
                trace!(name, "script macro call");
                let expansions = self.expand_macro_call(env, &script_macro, args)?;
                self.eval_body(env, &expansions)
            }
            Binding::Variable { .. } => Err(Error::NotCallable(name.to_owned())),
        }
    }

    fn call_function(
        &mut self,
        caller: &Environment,
        function: &ScriptCallable,
        arg_exprs: &[Expression],
    ) -> Result<Expression, Error> {
        check_arity(function, arg_exprs.len())?;

        // Arguments are evaluated where the call appears, never in the new frame
        let args = self.eval_args(caller, arg_exprs)?;

        let frame = Environment::with_outer(&function.closure);
        for (param, arg) in function.params.iter().zip(args) {
            frame.add(param.as_str(), Binding::variable(arg));
        }

        self.eval_body(&frame, &function.body)
    }

    /// Bind raw arguments and expand every body form of a script macro.
    /// Nothing is evaluated here.
    pub(crate) fn expand_macro_call(
        &mut self,
        caller: &Environment,
        script_macro: &ScriptCallable,
        arg_exprs: &[Expression],
    ) -> Result<Vec<Expression>, Error> {
        check_arity(script_macro, arg_exprs.len())?;

        let frame = Environment::with_outer(caller);
        for (param, raw) in script_macro.params.iter().zip(arg_exprs) {
            frame.add(param.as_str(), Binding::macro_parameter(raw.clone()));
        }

        Ok(script_macro
            .body
            .iter()
            .map(|expr| macro_expand(&frame, expr))
            .collect())
    }
}

fn check_arity(callable: &ScriptCallable, got: usize) -> Result<(), Error> {
    let expected = callable.params.len();
    if expected == got {
        Ok(())
    } else {
        Err(Error::arity_mismatch(
            callable.name.as_str(),
            Arity::Exact(expected),
            got,
        ))
    }
}

/// Helper function to add expression context to errors
fn add_context(error: Error, expr: &Expression) -> Error {
    let context = format!("while evaluating: {expr}");
    match error {
        Error::EvalError(msg) if !msg.contains("Context:") => {
            Error::EvalError(format!("{msg}\n  Context: {context}"))
        }
        Error::TypeMismatch(msg) if !msg.contains("Context:") => {
            Error::TypeMismatch(format!("{msg}\n  Context: {context}"))
        }
        // Other kinds carry the offending name already
        other => other,
    }
}

/// Substitute macro-parameter references with their raw argument expressions.
///
/// Symbols bound in `env` to a macro parameter are replaced, lists are rewritten
/// element-wise and everything else passes through unchanged.
pub fn macro_expand(env: &Environment, expr: &Expression) -> Expression {
    match expr {
        Expression::Atom(Atom::Symbol(name)) => match env.lookup(name) {
            Ok(Binding::Variable {
                value,
                is_macro_parameter: true,
            }) => value,
            _ => expr.clone(),
        },
        Expression::Atom(_) => expr.clone(),
        Expression::List(elements) => Expression::List(
            elements
                .iter()
                .map(|element| macro_expand(env, element))
                .collect(),
        ),
    }
}

/// Check whether `expr` is a call form whose operator is bound to a macro
pub fn is_macro(expr: &Expression, env: &Environment) -> bool {
    let Some([head, ..]) = expr.as_list() else {
        return false;
    };
    head.as_symbol()
        .and_then(|name| env.lookup(name).ok())
        .is_some_and(|binding| binding.is_macro())
}
