//! Unit-assembly compiler.
//!
//! ```text
//! # sum two arguments
//! fn main locals=1
//!   arg 0
//!   arg 1
//!   add
//!   print
//! end
//! ```
//!
//! Two passes: the first splits the source into function blocks so calls may
//! name functions defined later; the second resolves labels and operands.

use std::collections::HashMap;

use super::ir::{Function, Instr, Unit};

/// A submission unit failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{unit}:{line}: {message}")]
pub struct CompileError {
    pub unit: String,
    /// 1-based source line; 0 for whole-unit errors
    pub line: usize,
    pub message: String,
}

enum Stmt {
    Label(String),
    Op {
        mnemonic: String,
        operand: Option<String>,
    },
}

struct Block {
    name: String,
    locals: u16,
    line: usize,
    stmts: Vec<(usize, Stmt)>,
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Drop a trailing `#` comment, ignoring `#` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_str => escaped = true,
            '"' => in_str = !in_str,
            '#' if !in_str => return &line[..i],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(text: &str) -> Result<String, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string, got {text}"))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => return Err(format!("unknown escape \\{other}")),
                None => return Err("dangling escape at end of string".to_string()),
            },
            '"' => return Err("unescaped quote inside string".to_string()),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Compile unit-assembly source into IR.
pub fn compile_unit(name: &str, source: &str) -> Result<Unit, CompileError> {
    let err = |line: usize, message: String| CompileError {
        unit: name.to_string(),
        line,
        message,
    };

    // Pass 1: function blocks.
    let mut blocks: Vec<Block> = Vec::new();
    let mut open: Option<Block> = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default();

        if head == "fn" {
            if let Some(block) = &open {
                return Err(err(
                    line_no,
                    format!("function {} is not terminated before a new fn", block.name),
                ));
            }
            let fn_name = words
                .next()
                .ok_or_else(|| err(line_no, "fn needs a name".to_string()))?;
            if !is_ident(fn_name) {
                return Err(err(line_no, format!("invalid function name {fn_name}")));
            }
            let mut locals = 0u16;
            for extra in words {
                let value = extra
                    .strip_prefix("locals=")
                    .ok_or_else(|| err(line_no, format!("unexpected token {extra}")))?;
                locals = value
                    .parse()
                    .map_err(|_| err(line_no, format!("invalid locals count {value}")))?;
            }
            open = Some(Block {
                name: fn_name.to_string(),
                locals,
                line: line_no,
                stmts: Vec::new(),
            });
            continue;
        }

        let Some(block) = open.as_mut() else {
            return Err(err(line_no, format!("{head} outside of a function")));
        };

        if line == "end" {
            if let Some(done) = open.take() {
                blocks.push(done);
            }
            continue;
        }

        if let Some(label) = line.strip_suffix(':') {
            if !is_ident(label) {
                return Err(err(line_no, format!("invalid label {label}")));
            }
            block.stmts.push((line_no, Stmt::Label(label.to_string())));
            continue;
        }

        let operand = line[head.len()..].trim();
        block.stmts.push((
            line_no,
            Stmt::Op {
                mnemonic: head.to_string(),
                operand: (!operand.is_empty()).then(|| operand.to_string()),
            },
        ));
    }

    if let Some(block) = open {
        return Err(err(
            block.line,
            format!("function {} is missing `end`", block.name),
        ));
    }
    if blocks.is_empty() {
        return Err(err(0, "unit defines no functions".to_string()));
    }

    let mut fn_index: HashMap<&str, usize> = HashMap::new();
    for (i, block) in blocks.iter().enumerate() {
        if fn_index.insert(block.name.as_str(), i).is_some() {
            return Err(err(
                block.line,
                format!("duplicate function {}", block.name),
            ));
        }
    }

    // Pass 2: labels, then operands.
    let mut functions = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let mut labels: HashMap<&str, usize> = HashMap::new();
        let mut pc = 0usize;
        for (line_no, stmt) in &block.stmts {
            match stmt {
                Stmt::Label(label) => {
                    if labels.insert(label.as_str(), pc).is_some() {
                        return Err(err(*line_no, format!("duplicate label {label}")));
                    }
                }
                Stmt::Op { .. } => pc += 1,
            }
        }

        let mut body = Vec::with_capacity(pc);
        for (line_no, stmt) in &block.stmts {
            let Stmt::Op { mnemonic, operand } = stmt else {
                continue;
            };
            let instr = resolve(block, mnemonic, operand.as_deref(), &labels, &fn_index)
                .map_err(|message| err(*line_no, message))?;
            body.push(instr);
        }

        functions.push(Function {
            name: block.name.clone(),
            locals: block.locals,
            body,
        });
    }

    Ok(Unit {
        name: name.to_string(),
        functions,
        instrumented: false,
    })
}

fn resolve(
    block: &Block,
    mnemonic: &str,
    operand: Option<&str>,
    labels: &HashMap<&str, usize>,
    functions: &HashMap<&str, usize>,
) -> Result<Instr, String> {
    let required = || operand.ok_or_else(|| format!("`{mnemonic}` needs an operand"));
    let none = |instr: Instr| match operand {
        None => Ok(instr),
        Some(extra) => Err(format!("`{mnemonic}` takes no operand, got {extra}")),
    };
    let slot = |text: &str| -> Result<u16, String> {
        let slot: u16 = text
            .parse()
            .map_err(|_| format!("invalid slot {text}"))?;
        if slot >= block.locals {
            return Err(format!(
                "local slot {slot} out of range (function {} has {} locals)",
                block.name, block.locals
            ));
        }
        Ok(slot)
    };
    let label = |text: &str| -> Result<usize, String> {
        labels
            .get(text)
            .copied()
            .ok_or_else(|| format!("undefined label {text}"))
    };

    match mnemonic {
        "push" => {
            let text = required()?;
            text.parse::<i64>()
                .map(Instr::Push)
                .map_err(|_| format!("invalid integer {text}"))
        }
        "pop" => none(Instr::Pop),
        "dup" => none(Instr::Dup),
        "swap" => none(Instr::Swap),
        "add" => none(Instr::Add),
        "sub" => none(Instr::Sub),
        "mul" => none(Instr::Mul),
        "div" => none(Instr::Div),
        "rem" => none(Instr::Rem),
        "neg" => none(Instr::Neg),
        "eq" => none(Instr::Eq),
        "lt" => none(Instr::Lt),
        "gt" => none(Instr::Gt),
        "ret" => none(Instr::Ret),
        "print" => none(Instr::Print),
        "frame" => none(Instr::Frame),
        "halt" => none(Instr::Halt),
        "load" => slot(required()?).map(Instr::Load),
        "store" => slot(required()?).map(Instr::Store),
        "arg" => {
            let text = required()?;
            text.parse::<u16>()
                .map(Instr::Arg)
                .map_err(|_| format!("invalid argument index {text}"))
        }
        "jmp" => label(required()?).map(Instr::Jmp),
        "jz" => label(required()?).map(Instr::Jz),
        "jnz" => label(required()?).map(Instr::Jnz),
        "call" => {
            let text = required()?;
            functions
                .get(text)
                .copied()
                .map(Instr::Call)
                .ok_or_else(|| format!("undefined function {text}"))
        }
        "sleep" => {
            let text = required()?;
            text.parse::<u64>()
                .map(Instr::Sleep)
                .map_err(|_| format!("invalid duration {text}"))
        }
        "emit" => parse_string_literal(required()?).map(Instr::Emit),
        "fail" => parse_string_literal(required()?).map(Instr::Fail),
        "checkpoint" => Err("`checkpoint` is reserved for instrumentation".to_string()),
        other => Err(format!("unknown mnemonic {other}")),
    }
}
