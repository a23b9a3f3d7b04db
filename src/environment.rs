//! Scope chain and binding kinds.
//!
//! An [`Environment`] is a cheap, cloneable handle to one frame of bindings plus
//! an optional outer frame. Frames are shared through reference counting so a
//! closure can keep its defining frame alive after the defining call returns.
//! Lookups walk outward; definitions only ever touch the frame they are made in.

use crate::Error;
use crate::ast::Expression;
use crate::builtins::Arity;
use crate::evaluator::Evaluator;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Host callable receiving evaluated trailing arguments (operator excluded)
pub type NativeFn = dyn Fn(&mut Evaluator, &Environment, Vec<Expression>) -> Result<Expression, Error>;

/// Host callable receiving the raw call form (operator included)
pub type NativeMacroFn =
    dyn Fn(&mut Evaluator, &Environment, &[Expression]) -> Result<Expression, Error>;

/// A function or macro written in the language itself
pub struct ScriptCallable {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Expression>,
    /// Frame active at definition time. Function calls chain to it; macro
    /// expansions chain to the caller instead.
    pub closure: Environment,
}

impl std::fmt::Debug for ScriptCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The closure frame is omitted: it usually contains this callable.
        write!(
            f,
            "ScriptCallable({}, params={:?}, body={:?})",
            self.name, self.params, self.body
        )
    }
}

/// What a name is bound to within one frame
#[derive(Clone)]
pub enum Binding {
    /// Arity counts operands and is checked before any argument is evaluated
    NativeFunction {
        name: String,
        arity: Arity,
        func: Rc<NativeFn>,
    },
    NativeMacro {
        name: String,
        arity: Arity,
        func: Rc<NativeMacroFn>,
    },
    ScriptFunction(Rc<ScriptCallable>),
    ScriptMacro(Rc<ScriptCallable>),
    /// A value cell. Macro parameters hold the raw argument expression and are
    /// substituted during expansion rather than evaluated.
    Variable {
        value: Expression,
        is_macro_parameter: bool,
    },
}

impl Binding {
    pub fn variable(value: Expression) -> Self {
        Binding::Variable {
            value,
            is_macro_parameter: false,
        }
    }

    pub fn macro_parameter(raw: Expression) -> Self {
        Binding::Variable {
            value: raw,
            is_macro_parameter: true,
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(self, Binding::NativeMacro { .. } | Binding::ScriptMacro(_))
    }

    /// Short description used by the REPL and in error messages
    pub fn describe(&self) -> String {
        match self {
            Binding::NativeFunction { name, .. } => format!("#<native-function:{name}>"),
            Binding::NativeMacro { name, .. } => format!("#<native-macro:{name}>"),
            Binding::ScriptFunction(f) => format!("#<function:{}>", f.name),
            Binding::ScriptMacro(m) => format!("#<macro:{}>", m.name),
            Binding::Variable { value, .. } => value.to_string(),
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Variable {
                value,
                is_macro_parameter,
            } => write!(f, "Variable({value:?}, macro_parameter={is_macro_parameter})"),
            other => write!(f, "{}", other.describe()),
        }
    }
}

struct Frame {
    bindings: RefCell<HashMap<String, Binding>>,
    outer: Option<Environment>,
}

/// Handle to one scope frame; clones share the frame
#[derive(Clone)]
pub struct Environment(Rc<Frame>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// A root frame with no outer scope
    pub fn new() -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            outer: None,
        }))
    }

    /// A fresh frame whose lookups fall through to `outer`
    pub fn with_outer(outer: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            outer: Some(outer.clone()),
        }))
    }

    pub fn outer(&self) -> Option<&Environment> {
        self.0.outer.as_ref()
    }

    /// Insert or replace a binding in this frame only
    pub fn add(&self, name: impl Into<String>, binding: Binding) {
        self.0.bindings.borrow_mut().insert(name.into(), binding);
    }

    /// Resolve a name through this frame and then each outer frame
    pub fn lookup(&self, name: &str) -> Result<Binding, Error> {
        self.find(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_owned()))
    }

    fn find(&self, name: &str) -> Option<Binding> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(binding) = env.0.bindings.borrow().get(name) {
                return Some(binding.clone());
            }
            frame = env.outer();
        }
        None
    }

    /// Check whether this frame itself binds `name`
    pub fn binds_locally(&self, name: &str) -> bool {
        self.0.bindings.borrow().contains_key(name)
    }

    /// Write a variable into the nearest frame that already binds `name`,
    /// or define it in this frame when no frame does.
    pub fn assign(&self, name: &str, value: Expression) {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if env.binds_locally(name) {
                env.add(name, Binding::variable(value));
                return;
            }
            frame = env.outer();
        }
        self.add(name, Binding::variable(value));
    }

    /// Register a host function accepting any number of arguments; it receives
    /// them evaluated.
    ///
    /// # Example
    /// ```
    /// use ales::ast::{Atom, Expression};
    /// use ales::builtins::create_global_env;
    ///
    /// let env = create_global_env();
    /// env.register_native_function("arg-count", |_, _, args| {
    ///     Ok(Expression::Atom(Atom::Int(args.len() as i32)))
    /// });
    /// ```
    pub fn register_native_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut Evaluator, &Environment, Vec<Expression>) -> Result<Expression, Error> + 'static,
    {
        self.register_native_function_with_arity(name, Arity::Any, func);
    }

    /// Register a host function whose operand count is validated first
    pub fn register_native_function_with_arity<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&mut Evaluator, &Environment, Vec<Expression>) -> Result<Expression, Error> + 'static,
    {
        self.add(
            name,
            Binding::NativeFunction {
                name: name.to_owned(),
                arity,
                func: Rc::new(func),
            },
        );
    }

    /// Register a host macro; it receives the unevaluated call form including
    /// the operator symbol and decides what to evaluate itself.
    pub fn register_native_macro<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut Evaluator, &Environment, &[Expression]) -> Result<Expression, Error> + 'static,
    {
        self.register_native_macro_with_arity(name, Arity::Any, func);
    }

    /// Register a host macro whose operand count (operator excluded) is
    /// validated before it runs
    pub fn register_native_macro_with_arity<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&mut Evaluator, &Environment, &[Expression]) -> Result<Expression, Error> + 'static,
    {
        self.add(
            name,
            Binding::NativeMacro {
                name: name.to_owned(),
                arity,
                func: Rc::new(func),
            },
        );
    }

    /// Get all bindings visible from this frame, inner ones overriding outer.
    /// Returns a Vec of (name, binding) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Binding)> {
        let mut bindings = match self.outer() {
            Some(outer) => outer.get_all_bindings().into_iter().collect(),
            None => HashMap::new(),
        };

        for (name, binding) in self.0.bindings.borrow().iter() {
            bindings.insert(name.clone(), binding.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.0.bindings.borrow().keys().cloned().collect();
        names.sort();
        write!(f, "Environment({names:?}")?;
        if self.outer().is_some() {
            write!(f, ", outer")?;
        }
        write!(f, ")")
    }
}
