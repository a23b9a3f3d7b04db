//! Bytecode compiler and chunk format.
//!
//! [`Compiler`] lowers expressions into a [`CodeChunk`]: a flat byte buffer of
//! instructions plus a deduplicated constant pool. Each instruction is a one-byte
//! [`Opcode`] tag followed by its operand, if any:
//!
//! | Opcode       | Tag | Operand                          |
//! |--------------|-----|----------------------------------|
//! | `PushInt`    | 0   | `i32`, little-endian             |
//! | `PushFloat`  | 1   | `f32`, little-endian             |
//! | `PushString` | 2   | `u16` constant pool index        |
//! | `PushVar`    | 3   | NUL-terminated name              |
//! | `AddInt`     | 4   |                                  |
//! | `AddFloat`   | 5   |                                  |
//! | `Store`      | 6   | NUL-terminated name              |
//! | `FnCall`     | 7   | `u16` function index             |
//! | `PushBool`   | 8   | one byte, 0 or 1                 |
//! | `Pop`        | 9   |                                  |
//!
//! Tags are never reused; new instructions get new tags.
//!
//! Compilation of a call form is table driven: the operator name selects a
//! [`CompileFn`] that emits code and returns the [`StaticType`] of the value it
//! leaves on the stack. `+` uses the static type of its first operand to choose
//! between `AddInt` and `AddFloat`, and `defun` installs a routine for each new
//! function that emits a call to its compiled body.
//!
//! Malformed forms are reported as diagnostics and yield [`StaticType::Err`],
//! which callers propagate without emitting further code for that form.

use crate::ast::{Atom, Expression, FloatType, IntType, SourceForm, parse_parameters};
use crate::{Diagnostic, Error, Stage};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Compile-time type of the value a form leaves on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticType {
    /// Compilation failed; contagious
    Err,
    /// Nothing is left on the stack
    Void,
    Int,
    Float,
    Bool,
    String,
}

impl StaticType {
    fn is_numeric(self) -> bool {
        matches!(self, StaticType::Int | StaticType::Float)
    }

    /// Parse a parameter annotation such as `(x float)`
    pub fn from_annotation(name: &str) -> Option<Self> {
        match name {
            "int" => Some(StaticType::Int),
            "float" => Some(StaticType::Float),
            "bool" => Some(StaticType::Bool),
            "string" => Some(StaticType::String),
            _ => None,
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StaticType::Err => "err",
            StaticType::Void => "void",
            StaticType::Int => "int",
            StaticType::Float => "float",
            StaticType::Bool => "bool",
            StaticType::String => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    PushInt = 0,
    PushFloat = 1,
    PushString = 2,
    PushVar = 3,
    AddInt = 4,
    AddFloat = 5,
    Store = 6,
    FnCall = 7,
    PushBool = 8,
    Pop = 9,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Error> {
        let op = match byte {
            0 => Opcode::PushInt,
            1 => Opcode::PushFloat,
            2 => Opcode::PushString,
            3 => Opcode::PushVar,
            4 => Opcode::AddInt,
            5 => Opcode::AddFloat,
            6 => Opcode::Store,
            7 => Opcode::FnCall,
            8 => Opcode::PushBool,
            9 => Opcode::Pop,
            _ => {
                return Err(Error::InvalidBytecode(format!(
                    "unknown opcode byte {byte:#04x}"
                )));
            }
        };
        Ok(op)
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    PushInt(IntType),
    PushFloat(FloatType),
    PushString(u16),
    PushVar(String),
    AddInt,
    AddFloat,
    Store(String),
    FnCall(u16),
    PushBool(bool),
    Pop,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushInt(n) => write!(f, "PushInt {n}"),
            Instruction::PushFloat(x) => write!(f, "PushFloat {x:?}"),
            Instruction::PushString(idx) => write!(f, "PushString #{idx}"),
            Instruction::PushVar(name) => write!(f, "PushVar {name}"),
            Instruction::AddInt => write!(f, "AddInt"),
            Instruction::AddFloat => write!(f, "AddFloat"),
            Instruction::Store(name) => write!(f, "Store {name}"),
            Instruction::FnCall(idx) => write!(f, "FnCall {idx}"),
            Instruction::PushBool(b) => write!(f, "PushBool {b}"),
            Instruction::Pop => write!(f, "Pop"),
        }
    }
}

/// Literal held in a chunk's constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(IntType),
    Float(FloatType),
    String(String),
}

impl Constant {
    /// Pool identity. Floats compare by bit pattern so NaN deduplicates too.
    fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{n}"),
            Constant::Float(x) => write!(f, "{x:?}"),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Compiled instruction buffer plus constant pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeChunk {
    pub code_data: Vec<u8>,
    pub constants: Vec<Constant>,
}

impl CodeChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code_data.is_empty()
    }

    /// Add a constant to the pool and return its index, reusing an equal entry
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        if let Some(idx) = self.constants.iter().position(|c| c.same_as(&constant)) {
            return idx;
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    pub fn constant(&self, idx: usize) -> Result<&Constant, Error> {
        self.constants
            .get(idx)
            .ok_or_else(|| Error::InvalidBytecode(format!("constant index {idx} out of range")))
    }

    pub fn write_op(&mut self, op: Opcode) {
        self.code_data.push(op as u8);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.code_data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.code_data.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.code_data.extend_from_slice(&value.to_le_bytes());
    }

    /// Names are written NUL-terminated
    pub fn write_str(&mut self, value: &str) {
        self.code_data.extend_from_slice(value.as_bytes());
        self.code_data.push(0);
    }

    fn read_bytes<const N: usize>(&self, offset: &mut usize) -> Result<[u8; N], Error> {
        let bytes = self
            .code_data
            .get(*offset..*offset + N)
            .and_then(|slice| <[u8; N]>::try_from(slice).ok())
            .ok_or_else(|| {
                Error::InvalidBytecode(format!("truncated {N}-byte operand at offset {offset}"))
            })?;
        *offset += N;
        Ok(bytes)
    }

    fn read_str(&self, offset: &mut usize) -> Result<String, Error> {
        let rest = self.code_data.get(*offset..).unwrap_or_default();
        let len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::InvalidBytecode(format!("unterminated name at offset {offset}"))
        })?;
        let name = std::str::from_utf8(&rest[..len])
            .map_err(|e| Error::InvalidBytecode(format!("name at offset {offset}: {e}")))?
            .to_owned();
        *offset += len + 1;
        Ok(name)
    }

    /// Decode the instruction at `offset` and advance past it
    pub fn decode(&self, offset: &mut usize) -> Result<Instruction, Error> {
        let [byte] = self.read_bytes::<1>(offset)?;
        let instruction = match Opcode::try_from(byte)? {
            Opcode::PushInt => Instruction::PushInt(i32::from_le_bytes(self.read_bytes(offset)?)),
            Opcode::PushFloat => {
                Instruction::PushFloat(f32::from_le_bytes(self.read_bytes(offset)?))
            }
            Opcode::PushString => {
                Instruction::PushString(u16::from_le_bytes(self.read_bytes(offset)?))
            }
            Opcode::PushVar => Instruction::PushVar(self.read_str(offset)?),
            Opcode::AddInt => Instruction::AddInt,
            Opcode::AddFloat => Instruction::AddFloat,
            Opcode::Store => Instruction::Store(self.read_str(offset)?),
            Opcode::FnCall => Instruction::FnCall(u16::from_le_bytes(self.read_bytes(offset)?)),
            Opcode::PushBool => {
                let [b] = self.read_bytes::<1>(offset)?;
                Instruction::PushBool(b != 0)
            }
            Opcode::Pop => Instruction::Pop,
        };
        Ok(instruction)
    }

    /// Decode the whole chunk
    pub fn instructions(&self) -> Result<Vec<Instruction>, Error> {
        let mut offset = 0;
        let mut instructions = Vec::new();
        while offset < self.code_data.len() {
            instructions.push(self.decode(&mut offset)?);
        }
        Ok(instructions)
    }

    fn truncate(&mut self, code_len: usize, constants_len: usize) {
        self.code_data.truncate(code_len);
        self.constants.truncate(constants_len);
    }
}

/// Disassembly listing
impl fmt::Display for CodeChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;
        while offset < self.code_data.len() {
            let start = offset;
            match self.decode(&mut offset) {
                Ok(Instruction::PushString(idx)) => match self.constants.get(idx as usize) {
                    Some(constant) => writeln!(f, "{start:04} PushString #{idx} {constant}")?,
                    None => writeln!(f, "{start:04} PushString #{idx} <missing>")?,
                },
                Ok(instruction) => writeln!(f, "{start:04} {instruction}")?,
                Err(err) => return writeln!(f, "{start:04} <{err}>"),
            }
        }
        if !self.constants.is_empty() {
            writeln!(f, "constants:")?;
            for (idx, constant) in self.constants.iter().enumerate() {
                writeln!(f, "  #{idx} {constant}")?;
            }
        }
        Ok(())
    }
}

/// A function body compiled by `defun`
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub params: Vec<String>,
    pub return_type: StaticType,
    pub chunk: CodeChunk,
}

/// Output of a compilation: top-level code plus the function table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub main: CodeChunk,
    pub functions: Vec<CompiledFunction>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== main ==")?;
        write!(f, "{}", self.main)?;
        for (idx, function) in self.functions.iter().enumerate() {
            writeln!(f, "== fn {idx} {} ==", function.name)?;
            write!(f, "{}", function.chunk)?;
        }
        Ok(())
    }
}

/// Compilation routine for one operator; receives the whole call form
pub type CompileFn = Rc<dyn Fn(&[Expression], &mut Compiler) -> StaticType>;

pub struct Compiler {
    /// Chunk currently receiving code; the main chunk at top level
    chunk: CodeChunk,
    functions: Vec<CompiledFunction>,
    function_map: HashMap<String, usize>,
    forms: HashMap<String, CompileFn>,
    var_types: HashMap<String, StaticType>,
    diagnostics: Vec<Diagnostic>,
    line: usize,
}

/// Compiler tables as they were before a top-level form
struct Checkpoint {
    functions_len: usize,
    function_map: HashMap<String, usize>,
    forms: HashMap<String, CompileFn>,
    var_types: HashMap<String, StaticType>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// A compiler with `+`, `set` and `defun` registered
    pub fn new() -> Self {
        let mut compiler = Compiler {
            chunk: CodeChunk::new(),
            functions: Vec::new(),
            function_map: HashMap::new(),
            forms: HashMap::new(),
            var_types: HashMap::new(),
            diagnostics: Vec::new(),
            line: 0,
        };
        compiler.register_form("+", compile_add);
        compiler.register_form("set", compile_set);
        compiler.register_form("defun", compile_defun);
        compiler
    }

    /// Install or replace the compilation routine for an operator
    pub fn register_form<F>(&mut self, name: &str, routine: F)
    where
        F: Fn(&[Expression], &mut Compiler) -> StaticType + 'static,
    {
        self.forms.insert(name.to_owned(), Rc::new(routine));
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The chunk code is currently emitted into
    pub fn chunk(&self) -> &CodeChunk {
        &self.chunk
    }

    pub fn chunk_mut(&mut self) -> &mut CodeChunk {
        &mut self.chunk
    }

    pub fn functions(&self) -> &[CompiledFunction] {
        &self.functions
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.function_map.get(name).copied()
    }

    /// Static type recorded by the last `Store` to `name`
    pub fn var_type(&self, name: &str) -> Option<StaticType> {
        self.var_types.get(name).copied()
    }

    /// Hand out the main chunk compiled so far and start a fresh one.
    /// Function bodies and variable types are kept.
    pub fn take_chunk(&mut self) -> CodeChunk {
        std::mem::take(&mut self.chunk)
    }

    pub fn finish(self) -> Program {
        Program {
            main: self.chunk,
            functions: self.functions,
        }
    }

    /// Record a diagnostic at the current line and yield `Err`
    pub fn report(&mut self, message: impl Into<String>) -> StaticType {
        let diagnostic = Diagnostic::new(Stage::Compile, self.line, message);
        warn!(line = diagnostic.line, message = %diagnostic.message, "compile error");
        self.diagnostics.push(diagnostic);
        StaticType::Err
    }

    /// Compile one top-level form. On failure the code emitted for it is
    /// discarded so the chunk stays runnable.
    pub fn compile_form(&mut self, form: &SourceForm) -> Result<StaticType, Error> {
        self.line = form.line;
        let code_len = self.chunk.code_data.len();
        let constants_len = self.chunk.constants.len();
        let reported = self.diagnostics.len();
        let checkpoint = self.checkpoint();

        match self.compile(&form.expr) {
            StaticType::Err => {
                self.chunk.truncate(code_len, constants_len);
                self.restore(checkpoint);
                let message = self.diagnostics[reported..]
                    .first()
                    .map(|d| d.message.clone())
                    .unwrap_or_else(|| "compilation failed".to_owned());
                Err(Error::CompileError {
                    line: form.line,
                    message,
                })
            }
            ty => Ok(ty),
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            functions_len: self.functions.len(),
            function_map: self.function_map.clone(),
            forms: self.forms.clone(),
            var_types: self.var_types.clone(),
        }
    }

    /// Forget variables and functions introduced by a failed form
    fn restore(&mut self, checkpoint: Checkpoint) {
        self.functions.truncate(checkpoint.functions_len);
        self.function_map = checkpoint.function_map;
        self.forms = checkpoint.forms;
        self.var_types = checkpoint.var_types;
    }

    /// Compile every form, continuing past failures
    pub fn compile_program(&mut self, forms: &[SourceForm]) -> Vec<Result<StaticType, Diagnostic>> {
        forms
            .iter()
            .map(|form| {
                self.compile_form(form)
                    .map_err(|err| Diagnostic::from_error(&err, form.line))
            })
            .collect()
    }

    /// Compile an expression into the current chunk
    pub fn compile(&mut self, expr: &Expression) -> StaticType {
        match expr {
            Expression::Atom(Atom::Int(n)) => {
                self.chunk.write_op(Opcode::PushInt);
                self.chunk.write_i32(*n);
                StaticType::Int
            }
            Expression::Atom(Atom::Float(x)) => {
                self.chunk.write_op(Opcode::PushFloat);
                self.chunk.write_f32(*x);
                StaticType::Float
            }
            Expression::Atom(Atom::Bool(b)) => {
                self.chunk.write_op(Opcode::PushBool);
                self.chunk.code_data.push(u8::from(*b));
                StaticType::Bool
            }
            Expression::Atom(Atom::String(s)) => {
                let idx = self.chunk.add_constant(Constant::String(s.clone()));
                let Ok(idx) = u16::try_from(idx) else {
                    return self.report("constant pool exceeds 65536 entries");
                };
                self.chunk.write_op(Opcode::PushString);
                self.chunk.write_u16(idx);
                StaticType::String
            }
            Expression::Atom(Atom::Symbol(name)) => match self.var_types.get(name).copied() {
                Some(ty) => {
                    self.chunk.write_op(Opcode::PushVar);
                    self.chunk.write_str(name);
                    ty
                }
                None if self.forms.contains_key(name) => {
                    self.report(format!("{name} is not a variable"))
                }
                None => self.report(format!("undefined variable {name}")),
            },
            Expression::List(elements) => {
                let Some(head) = elements.first() else {
                    return self.report("cannot compile an empty list");
                };
                let Some(name) = head.as_symbol() else {
                    return self.report(format!("cannot call {head}"));
                };
                match self.forms.get(name).cloned() {
                    Some(routine) => routine(elements, self),
                    None => self.report(format!("unknown operator {name}")),
                }
            }
        }
    }

    fn compile_call(
        &mut self,
        form: &[Expression],
        index: u16,
        params: &[(String, StaticType)],
        return_type: StaticType,
    ) -> StaticType {
        let [head, args @ ..] = form else {
            return StaticType::Err;
        };
        if args.len() != params.len() {
            return self.report(format!(
                "{head} expects {} arguments, got {}",
                params.len(),
                args.len()
            ));
        }

        for (i, (arg, (_, expected))) in args.iter().zip(params).enumerate() {
            match self.compile(arg) {
                StaticType::Err => return StaticType::Err,
                ty if ty == *expected => {}
                ty => {
                    return self.report(format!(
                        "{head}: argument {} expected {expected}, got {ty}",
                        i + 1
                    ));
                }
            }
        }

        // Arguments are on the stack in order, so the last parameter is on top
        for (name, _) in params.iter().rev() {
            self.chunk.write_op(Opcode::Store);
            self.chunk.write_str(name);
        }
        self.chunk.write_op(Opcode::FnCall);
        self.chunk.write_u16(index);
        return_type
    }
}

/// `(+ a b ...)`: the first operand's static type picks the add opcode
fn compile_add(form: &[Expression], compiler: &mut Compiler) -> StaticType {
    let [first, rest @ ..] = &form[1..] else {
        compiler.chunk.write_op(Opcode::PushInt);
        compiler.chunk.write_i32(0);
        return StaticType::Int;
    };

    let result = match compiler.compile(first) {
        StaticType::Err => return StaticType::Err,
        ty if ty.is_numeric() => ty,
        ty => return compiler.report(format!("+: expected a number, got {ty}")),
    };
    let add = if result == StaticType::Int {
        Opcode::AddInt
    } else {
        Opcode::AddFloat
    };

    for operand in rest {
        match compiler.compile(operand) {
            StaticType::Err => return StaticType::Err,
            ty if ty.is_numeric() => compiler.chunk.write_op(add),
            ty => return compiler.report(format!("+: expected a number, got {ty}")),
        }
    }
    result
}

/// `(set name value)`
fn compile_set(form: &[Expression], compiler: &mut Compiler) -> StaticType {
    let [_, target, value] = form else {
        return compiler.report(format!(
            "set expects 2 arguments, got {}",
            form.len().saturating_sub(1)
        ));
    };
    let Some(name) = target.as_symbol() else {
        return compiler.report(format!("set expects a symbol name, got {target}"));
    };

    match compiler.compile(value) {
        StaticType::Err => StaticType::Err,
        StaticType::Void => compiler.report(format!("set {name}: value has no result")),
        ty => {
            compiler.chunk.write_op(Opcode::Store);
            compiler.chunk.write_str(name);
            compiler.var_types.insert(name.to_owned(), ty);
            StaticType::Void
        }
    }
}

/// `(defun name (params...) body...)`
fn compile_defun(form: &[Expression], compiler: &mut Compiler) -> StaticType {
    let [_, name, params, body @ ..] = form else {
        return compiler.report("defun expects a name, a parameter list and a body");
    };
    if body.is_empty() {
        return compiler.report("defun expects a name, a parameter list and a body");
    }
    let Some(name) = name.as_symbol() else {
        return compiler.report(format!("defun expects a symbol name, got {name}"));
    };
    let params = match parse_parameters("defun", params) {
        Ok(params) => params,
        Err(err) => return compiler.report(err.to_string()),
    };

    let mut typed_params = Vec::with_capacity(params.len());
    for param in params {
        let ty = match param.annotation.as_deref() {
            None => StaticType::Int,
            Some(annotation) => match StaticType::from_annotation(annotation) {
                Some(ty) => ty,
                None => {
                    return compiler.report(format!(
                        "defun {name}: unknown type {annotation} for parameter {}",
                        param.name
                    ));
                }
            },
        };
        // Parameters live in the flat global table like every other variable
        compiler.var_types.insert(param.name.clone(), ty);
        typed_params.push((param.name, ty));
    }

    let Ok(index) = u16::try_from(compiler.functions.len()) else {
        return compiler.report("function table exceeds 65536 entries");
    };

    // Compile the body into its own chunk
    let outer = std::mem::take(&mut compiler.chunk);
    let mut return_type = StaticType::Void;
    for (i, expr) in body.iter().enumerate() {
        return_type = compiler.compile(expr);
        if return_type == StaticType::Err {
            compiler.chunk = outer;
            return StaticType::Err;
        }
        if i + 1 < body.len() && return_type != StaticType::Void {
            compiler.chunk.write_op(Opcode::Pop);
        }
    }
    let chunk = std::mem::replace(&mut compiler.chunk, outer);

    compiler.functions.push(CompiledFunction {
        name: name.to_owned(),
        params: typed_params.iter().map(|(n, _)| n.clone()).collect(),
        return_type,
        chunk,
    });
    compiler.function_map.insert(name.to_owned(), index as usize);
    debug!(name, index, %return_type, "registered compiled function");

    compiler.register_form(name, move |form, compiler| {
        compiler.compile_call(form, index, &typed_params, return_type)
    });
    StaticType::Void
}


#[cfg(all(test, feature = "reader"))]
#[expect(clippy::unwrap_used)] // test code OK
mod compile_tests {
    use super::*;
    use crate::reader::parse_program;

    fn compile_source(src: &str) -> (Compiler, Vec<Result<StaticType, Diagnostic>>) {
        let mut compiler = Compiler::new();
        let results = compiler.compile_program(&parse_program(src).unwrap());
        (compiler, results)
    }

    #[test]
    fn test_static_types() {
        let cases = vec![
            ("42", StaticType::Int),
            ("1.5", StaticType::Float),
            ("true", StaticType::Bool),
            ("\"s\"", StaticType::String),
            ("(+ 2 3)", StaticType::Int),
            ("(+ 2.0 3)", StaticType::Float),
            ("(set a 1)", StaticType::Void),
            ("(defun f () 1)", StaticType::Void),
        ];
        for (src, expected) in cases {
            let (_, results) = compile_source(src);
            assert_eq!(results, vec![Ok(expected)], "{src}");
        }
    }

    #[test]
    fn test_variable_types_follow_stores() {
        let (compiler, results) = compile_source("(set a 1.5) (+ a 1) (set a 2) (+ a 1)");
        assert_eq!(
            results,
            vec![
                Ok(StaticType::Void),
                Ok(StaticType::Float),
                Ok(StaticType::Void),
                Ok(StaticType::Int),
            ]
        );
        assert_eq!(compiler.var_type("a"), Some(StaticType::Int));
    }

    #[test]
    fn test_diagnostics() {
        let cases = vec![
            ("x", "undefined variable x"),
            ("(+ 1 \"a\")", "+: expected a number, got string"),
            ("(+ true 1)", "+: expected a number, got bool"),
            ("(set a)", "set expects 2 arguments, got 1"),
            ("(set 1 2)", "set expects a symbol name"),
            ("(set a (set b 1))", "value has no result"),
            ("(print 1)", "unknown operator print"),
            ("()", "cannot compile an empty list"),
            ("(1 2)", "cannot call 1"),
            ("(defun f)", "defun expects"),
            ("(defun f x 1)", "parameters must be a list"),
            ("(defun f ((x complex)) x)", "unknown type complex"),
            ("(defun f (x) x) (f)", "expects 1 arguments, got 0"),
            ("(defun f ((s string)) s) (f 1)", "argument 1 expected string, got int"),
            ("(defun f () 1) f", "f is not a variable"),
        ];
        for (src, expected) in cases {
            let (compiler, results) = compile_source(src);
            let err = results.last().unwrap().as_ref().unwrap_err();
            assert_eq!(err.stage, Stage::Compile, "{src}");
            assert!(
                err.message.contains(expected),
                "{src}: expected '{expected}', got {err}"
            );
            assert!(
                compiler.diagnostics().iter().any(|d| d.message.contains(expected)),
                "{src}"
            );
        }
    }

    #[test]
    fn test_diagnostic_carries_line() {
        let (compiler, results) = compile_source("(set a 1)\n\n(+ a missing)");
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(
            err.to_string(),
            "compile error line 3 - CompileError: undefined variable missing"
        );
        assert_eq!(
            compiler.diagnostics()[0].to_string(),
            "compile error line 3 - undefined variable missing"
        );
    }

    #[test]
    fn test_failed_form_is_rolled_back() {
        let (compiler, results) = compile_source("(set a 1) (+ a 2 \"oops\") (set b a)");
        assert!(results[1].is_err());
        assert_eq!(
            compiler.chunk().instructions().unwrap(),
            vec![
                Instruction::PushInt(1),
                Instruction::Store("a".into()),
                Instruction::PushVar("a".into()),
                Instruction::Store("b".into()),
            ]
        );
        // The string constant from the failed form is gone too
        assert!(compiler.chunk().constants.is_empty());
    }

    #[test]
    fn test_failed_form_leaves_no_names_behind() {
        // (source, error of the last form, names the compiler must not know)
        let cases = vec![
            (
                "(defun f (x) (+ x \"a\"))\nx",
                "undefined variable x",
                vec!["f", "x"],
            ),
            ("(+ 1 (set q 2))\n(+ q 1)", "undefined variable q", vec!["q"]),
            (
                "(defun g (y) (defun h () 1) (+ y \"s\"))\n(h)",
                "unknown operator h",
                vec!["g", "h", "y"],
            ),
            (
                "(set a 1)\n(+ a (set b 2))\n(+ a b)",
                "undefined variable b",
                vec!["b"],
            ),
        ];

        for (i, (src, expected, unknown)) in cases.into_iter().enumerate() {
            let case = format!("case #{}: {src:?}", i + 1);
            let (compiler, results) = compile_source(src);
            let err = results.last().unwrap().as_ref().unwrap_err();
            assert!(err.message.contains(expected), "{case}: got {err}");
            for name in unknown {
                assert_eq!(compiler.var_type(name), None, "{case}: variable {name}");
                assert_eq!(compiler.function_index(name), None, "{case}: function {name}");
            }
            assert!(compiler.functions().is_empty(), "{case}");

            // Whatever did compile still runs
            let mut vm = crate::vm::VirtualMachine::new();
            assert_eq!(vm.run(&compiler.finish()), Ok(()), "{case}");
        }
    }

    #[test]
    fn test_defun_and_call_sequence() {
        let (compiler, results) = compile_source(
            "(defun add3 (a b (c float)) (set tmp (+ a b)) (+ c tmp))
             (add3 1 2 0.5)",
        );
        assert_eq!(results, vec![Ok(StaticType::Void), Ok(StaticType::Float)]);

        let function = &compiler.functions()[0];
        assert_eq!(function.name, "add3");
        assert_eq!(function.params, vec!["a", "b", "c"]);
        assert_eq!(function.return_type, StaticType::Float);
        assert_eq!(compiler.function_index("add3"), Some(0));
        assert_eq!(
            function.chunk.instructions().unwrap(),
            vec![
                Instruction::PushVar("a".into()),
                Instruction::PushVar("b".into()),
                Instruction::AddInt,
                Instruction::Store("tmp".into()),
                Instruction::PushVar("c".into()),
                Instruction::PushVar("tmp".into()),
                Instruction::AddFloat,
            ]
        );

        assert_eq!(
            compiler.chunk().instructions().unwrap(),
            vec![
                Instruction::PushInt(1),
                Instruction::PushInt(2),
                Instruction::PushFloat(0.5),
                Instruction::Store("c".into()),
                Instruction::Store("b".into()),
                Instruction::Store("a".into()),
                Instruction::FnCall(0),
            ]
        );
    }

    #[test]
    fn test_valued_body_forms_are_popped() {
        let (compiler, _) = compile_source("(defun f () 1 2.5 (set x 3) 4)");
        assert_eq!(
            compiler.functions()[0].chunk.instructions().unwrap(),
            vec![
                Instruction::PushInt(1),
                Instruction::Pop,
                Instruction::PushFloat(2.5),
                Instruction::Pop,
                Instruction::PushInt(3),
                Instruction::Store("x".into()),
                Instruction::PushInt(4),
            ]
        );
    }

    #[test]
    fn test_custom_form_registration() {
        let mut compiler = Compiler::new();
        // A host form that compiles to a constant
        compiler.register_form("answer", |_, compiler| {
            compiler.chunk_mut().write_op(Opcode::PushInt);
            compiler.chunk_mut().write_i32(42);
            StaticType::Int
        });
        let forms = parse_program("(+ (answer) 1)").unwrap();
        assert_eq!(compiler.compile_form(&forms[0]), Ok(StaticType::Int));
        let program = compiler.finish();
        assert_eq!(
            program.main.instructions().unwrap(),
            vec![
                Instruction::PushInt(42),
                Instruction::PushInt(1),
                Instruction::AddInt,
            ]
        );
    }
}
