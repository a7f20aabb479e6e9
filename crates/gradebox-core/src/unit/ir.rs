//! Intermediate representation of compiled units.
//!
//! Jump operands are instruction indices within the enclosing function;
//! `Call` operands are function indices within the unit. An index equal to
//! the body length is valid and means "return from this function".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Instr {
    Push(i64),
    Pop,
    Dup,
    Swap,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Eq,
    Lt,
    Gt,
    Load(u16),
    Store(u16),
    Arg(u16),
    Jmp(usize),
    Jz(usize),
    Jnz(usize),
    Call(usize),
    Ret,
    Print,
    Emit(String),
    Frame,
    Sleep(u64),
    Fail(String),
    Halt,
    /// Cooperative timeout hook. Only the instrumentation pass emits it.
    Checkpoint,
    /// Record a call of the enclosing function with its top `n` operands.
    /// Only the hook pass emits it.
    LogInvocation(u16),
}

impl Instr {
    /// Jump target, if this is a branch.
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Instr::Jmp(t) | Instr::Jz(t) | Instr::Jnz(t) => Some(*t),
            _ => None,
        }
    }

    /// Same branch kind pointed at `target`; non-branches are returned as is.
    pub fn retarget(&self, target: usize) -> Instr {
        match self {
            Instr::Jmp(_) => Instr::Jmp(target),
            Instr::Jz(_) => Instr::Jz(target),
            Instr::Jnz(_) => Instr::Jnz(target),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Number of local slots, zero-initialised on entry
    pub locals: u16,
    pub body: Vec<Instr>,
}

/// A compiled unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub name: String,
    pub functions: Vec<Function>,
    /// Set by the instrumentation pass
    #[serde(default)]
    pub instrumented: bool,
}

impl Unit {
    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<(usize, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.body.len()).sum()
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn checkpoint_count(&self) -> usize {
        self.functions
            .iter()
            .flat_map(|f| f.body.iter())
            .filter(|i| matches!(i, Instr::Checkpoint))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retarget_only_touches_branches() {
        assert_eq!(Instr::Jz(3).retarget(7), Instr::Jz(7));
        assert_eq!(Instr::Add.retarget(7), Instr::Add);
        assert_eq!(Instr::Jnz(1).jump_target(), Some(1));
        assert_eq!(Instr::Call(1).jump_target(), None);
    }

    #[test]
    fn wire_format_is_tagged() {
        let json = serde_json::to_string(&Instr::Push(5)).unwrap();
        assert_eq!(json, r#"{"op":"push","arg":5}"#);
        let json = serde_json::to_string(&Instr::Halt).unwrap();
        assert_eq!(json, r#"{"op":"halt"}"#);
    }
}
