//! Ales - a small embedded Lisp with two back ends
//!
//! Source text is read into [`ast::Expression`] trees which can then be run in
//! one of two ways:
//!
//! ```text
//! (defun inc (x) (+ x 1))   ; define a function
//! (set a (inc 41))          ; bind a variable
//! (if (eq a 42) "yes" "no") ; control flow is a native macro
//! ```
//!
//! - **Tree-walking**: [`evaluator::Evaluator`] interprets a tree against a chain
//!   of lexically scoped [`environment::Environment`] frames. Script functions
//!   close over their defining scope; script macros receive their arguments
//!   unevaluated and substitute them into their body before evaluation.
//! - **Bytecode**: [`compiler::Compiler`] lowers a tree to a compact
//!   [`compiler::CodeChunk`] (a byte buffer plus a deduplicated constant pool)
//!   which [`vm::VirtualMachine`] executes on an operand stack. The compiler
//!   propagates a static numeric type so `+` picks an integer or float add at
//!   compile time.
//!
//! Host programs extend the language by registering native functions and
//! native macros on an environment before running any program text.
//!
//! ## Modules
//!
//! - `ast`: expression data model
//! - `environment`: scope chain and bindings
//! - `evaluator`: tree-walking interpreter and macro expansion
//! - `builtins`: native function and macro registry
//! - `compiler`: bytecode compiler and chunk format
//! - `vm`: stack machine
//! - `reader`: source text to expressions (feature `reader`)

use std::fmt;

use crate::builtins::Arity;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 64;

/// Default maximum depth of nested `eval` calls before evaluation is aborted.
/// Each script function call, macro expansion and nested argument counts.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Maximum nesting of compiled function calls inside one VM run
pub const MAX_CALL_DEPTH: usize = 128;

/// Error types shared by the reader, evaluator, compiler and virtual machine
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(String),
    /// Name not found in any reachable environment frame
    UnboundSymbol(String),
    /// Operator position resolved to something that cannot be applied
    NotCallable(String),
    /// Symbol in value position resolved to a function or macro
    NotAVariable(String),
    ArityMismatch {
        name: String,
        expected: Arity,
        got: usize,
    },
    TypeMismatch(String),
    EvalError(String),
    CompileError {
        line: usize,
        message: String,
    },
    StackUnderflow,
    /// VM read of a global that was never stored
    UndefinedVariable(String),
    InvalidBytecode(String),
}

impl Error {
    pub fn arity_mismatch(name: impl Into<String>, expected: Arity, got: usize) -> Self {
        Error::ArityMismatch {
            name: name.into(),
            expected,
            got,
        }
    }

    /// Which pipeline stage reports this kind of error
    pub fn stage(&self) -> Stage {
        match self {
            Error::ParseError(_) => Stage::Parser,
            Error::CompileError { .. } => Stage::Compile,
            Error::StackUnderflow | Error::UndefinedVariable(_) | Error::InvalidBytecode(_) => {
                Stage::Vm
            }
            _ => Stage::Eval,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(msg) => write!(f, "ParseError: {msg}"),
            Error::UnboundSymbol(name) => write!(f, "Unbound symbol: {name}"),
            Error::NotCallable(what) => write!(f, "Not callable: {what}"),
            Error::NotAVariable(name) => {
                write!(f, "Not a variable: {name} is bound to a function or macro")
            }
            Error::ArityMismatch {
                name,
                expected,
                got,
            } => write!(
                f,
                "ArityMismatch: {name} expected {expected} arguments, got {got}"
            ),
            Error::TypeMismatch(msg) => write!(f, "Type mismatch: {msg}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            // The line is reported by the enclosing Diagnostic
            Error::CompileError { message, .. } => write!(f, "CompileError: {message}"),
            Error::StackUnderflow => write!(f, "Stack underflow"),
            Error::UndefinedVariable(name) => write!(f, "Undefined variable: {name}"),
            Error::InvalidBytecode(msg) => write!(f, "Invalid bytecode: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

/// Pipeline stage named in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parser,
    Eval,
    Compile,
    Vm,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Parser => "parser",
            Stage::Eval => "eval",
            Stage::Compile => "compile",
            Stage::Vm => "vm",
        };
        f.write_str(name)
    }
}

/// A human-readable report tied to a source line
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub stage: Stage,
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: Stage, line: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            stage,
            line,
            message: message.into(),
        }
    }

    /// Attach a source line to an error raised while processing a form
    pub fn from_error(error: &Error, line: usize) -> Self {
        Diagnostic::new(error.stage(), line, error.to_string())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} error line {} - {}", self.stage, self.line, self.message)
    }
}

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod environment;
pub mod evaluator;
pub mod vm;

#[cfg(feature = "reader")]
pub mod reader;
