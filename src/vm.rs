//! Stack machine for compiled chunks.
//!
//! The VM keeps one operand stack and one flat table of globals for a whole run.
//! There are no call frames: `Store` and `PushVar` always address the global
//! table, including inside compiled function bodies, and `FnCall` runs the
//! callee's chunk against the same stack and globals.

use crate::ast::{FloatType, IntType};
use crate::compiler::{CodeChunk, CompiledFunction, Constant, Instruction, Program};
use crate::{Error, MAX_CALL_DEPTH};
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// Runtime value held on the operand stack or in a global
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(IntType),
    Float(FloatType),
    Bool(bool),
    String(String),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
        }
    }

    /// Integer view for `AddInt`; floats truncate toward zero
    fn to_int(&self) -> Result<IntType, Error> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(x) => Ok(*x as IntType),
            other => Err(Error::TypeMismatch(format!(
                "AddInt expects numbers, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Float view for `AddFloat`; ints are widened
    fn to_float(&self) -> Result<FloatType, Error> {
        match self {
            Value::Int(n) => Ok(*n as FloatType),
            Value::Float(x) => Ok(*x),
            other => Err(Error::TypeMismatch(format!(
                "AddFloat expects numbers, got {}",
                other.kind_name()
            ))),
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(x) => Value::Float(*x),
            Constant::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct VirtualMachine {
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    call_depth: usize,
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn top(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// All globals sorted by name
    pub fn globals(&self) -> Vec<(&str, &Value)> {
        let mut globals: Vec<_> = self
            .globals
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect();
        globals.sort_by(|a, b| a.0.cmp(b.0));
        globals
    }

    /// Discard everything left on the operand stack; globals are kept
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Run a program's main chunk
    pub fn run(&mut self, program: &Program) -> Result<(), Error> {
        self.run_chunk(&program.main, &program.functions)
    }

    /// Run one chunk; `FnCall` indexes into `functions`
    pub fn run_chunk(
        &mut self,
        chunk: &CodeChunk,
        functions: &[CompiledFunction],
    ) -> Result<(), Error> {
        let mut offset = 0;
        while offset < chunk.code_data.len() {
            let at = offset;
            let instruction = chunk.decode(&mut offset)?;
            trace!(offset = at, %instruction, depth = self.stack.len(), "vm step");
            self.execute(chunk, functions, instruction)?;
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    fn pop_pair(&mut self) -> Result<(Value, Value), Error> {
        let right = self.pop()?;
        let left = self.pop()?;
        Ok((left, right))
    }

    fn execute(
        &mut self,
        chunk: &CodeChunk,
        functions: &[CompiledFunction],
        instruction: Instruction,
    ) -> Result<(), Error> {
        match instruction {
            Instruction::PushInt(n) => self.stack.push(Value::Int(n)),
            Instruction::PushFloat(x) => self.stack.push(Value::Float(x)),
            Instruction::PushBool(b) => self.stack.push(Value::Bool(b)),
            Instruction::PushString(idx) => match chunk.constant(idx as usize)? {
                constant @ Constant::String(_) => self.stack.push(Value::from(constant)),
                other => {
                    return Err(Error::InvalidBytecode(format!(
                        "PushString #{idx} refers to non-string constant {other}"
                    )));
                }
            },
            Instruction::PushVar(name) => {
                let value = self
                    .globals
                    .get(&name)
                    .cloned()
                    .ok_or(Error::UndefinedVariable(name))?;
                self.stack.push(value);
            }
            Instruction::AddInt => {
                let (left, right) = self.pop_pair()?;
                let sum = left
                    .to_int()?
                    .checked_add(right.to_int()?)
                    .ok_or_else(|| Error::EvalError("Integer overflow in addition".into()))?;
                self.stack.push(Value::Int(sum));
            }
            Instruction::AddFloat => {
                let (left, right) = self.pop_pair()?;
                self.stack.push(Value::Float(left.to_float()? + right.to_float()?));
            }
            Instruction::Store(name) => {
                let value = self.pop()?;
                self.globals.insert(name, value);
            }
            Instruction::Pop => {
                self.pop()?;
            }
            Instruction::FnCall(idx) => {
                let function = functions.get(idx as usize).ok_or_else(|| {
                    Error::InvalidBytecode(format!("function index {idx} out of range"))
                })?;
                if self.call_depth >= MAX_CALL_DEPTH {
                    return Err(Error::EvalError(format!(
                        "Call depth limit exceeded (max: {MAX_CALL_DEPTH}) in {}",
                        function.name
                    )));
                }
                self.call_depth += 1;
                let result = self.run_chunk(&function.chunk, functions);
                self.call_depth -= 1;
                result?;
            }
        }
        Ok(())
    }
}
