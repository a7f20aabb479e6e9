//! Interpreter for compiled units.
//!
//! Runs inside the sandbox process only. Faults, resource exhaustion and the
//! cooperative checkpoint timeout surface as [`Trap`]s; the sandbox binary
//! maps them to exit codes.

use std::io::Write;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::ir::{Instr, Unit};
use crate::domain::environment::{ConfigMismatchError, ExecutionEnvironment};

/// Hard interpreter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmLimits {
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_stack_depth: 4096,
            max_call_depth: 256,
        }
    }
}

/// Upper bound on logged invocations per run.
pub const MAX_LOGGED_INVOCATIONS: usize = 10_000;

/// One recorded call of a hooked function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub function: String,
    /// Top operands at entry, deepest first
    pub operands: Vec<i64>,
}

/// Abnormal termination of a program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Trap {
    #[error("fault: {0}")]
    Fault(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("checkpoint: time budget of {budget_ms}ms exhausted")]
    SoftTimeout { budget_ms: u64 },

    #[error(transparent)]
    ConfigMismatch(#[from] ConfigMismatchError),
}

impl From<std::io::Error> for Trap {
    fn from(err: std::io::Error) -> Self {
        Trap::Fault(format!("output error: {err}"))
    }
}

/// Per-run interpreter inputs.
#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    /// Descriptor arguments, parsed lazily by `arg`
    pub args: Vec<String>,
    pub limits: VmLimits,
    /// Checkpoint budget; `None` makes checkpoints no-ops
    pub budget: Option<Duration>,
    /// Applied headless environment; required by `frame`
    pub environment: Option<ExecutionEnvironment>,
}

struct Frame {
    func: usize,
    pc: usize,
    locals: Vec<i64>,
}

fn fault(msg: impl Into<String>) -> Trap {
    Trap::Fault(msg.into())
}

struct Machine<'a> {
    stack: Vec<i64>,
    limits: &'a VmLimits,
}

impl Machine<'_> {
    fn pop(&mut self) -> Result<i64, Trap> {
        self.stack
            .pop()
            .ok_or_else(|| fault("operand stack underflow"))
    }

    fn push(&mut self, value: i64) -> Result<(), Trap> {
        if self.stack.len() >= self.limits.max_stack_depth {
            return Err(Trap::ResourceExhausted(format!(
                "operand stack depth limit of {} exceeded",
                self.limits.max_stack_depth
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn binary<F>(&mut self, op: F) -> Result<(), Trap>
    where
        F: FnOnce(i64, i64) -> Result<i64, Trap>,
    {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(op(a, b)?)
    }
}

/// Run `entry` to completion, writing program output to `out`.
pub fn execute<W: Write>(
    unit: &Unit,
    entry: &str,
    options: &VmOptions,
    out: &mut W,
) -> Result<(), Trap> {
    execute_logged(unit, entry, options, out, &mut Vec::new())
}

/// Like [`execute`], also appending every `LogInvocation` hit to `log`.
/// Entries recorded before a trap are kept.
pub fn execute_logged<W: Write>(
    unit: &Unit,
    entry: &str,
    options: &VmOptions,
    out: &mut W,
    log: &mut Vec<Invocation>,
) -> Result<(), Trap> {
    let (entry_idx, entry_fn) = unit
        .function(entry)
        .ok_or_else(|| fault(format!("unit {} has no function {entry}", unit.name)))?;

    let started = Instant::now();
    let mut frames_rendered = 0u64;
    let mut m = Machine {
        stack: Vec::new(),
        limits: &options.limits,
    };
    let mut frames = vec![Frame {
        func: entry_idx,
        pc: 0,
        locals: vec![0; entry_fn.locals as usize],
    }];

    let overflow = || fault("integer overflow");

    while let Some(frame) = frames.last_mut() {
        let body = &unit.functions[frame.func].body;
        let Some(instr) = body.get(frame.pc) else {
            // Fell off the end: implicit return.
            frames.pop();
            continue;
        };
        frame.pc += 1;

        match instr {
            Instr::Push(v) => m.push(*v)?,
            Instr::Pop => {
                m.pop()?;
            }
            Instr::Dup => {
                let v = m.pop()?;
                m.push(v)?;
                m.push(v)?;
            }
            Instr::Swap => {
                let b = m.pop()?;
                let a = m.pop()?;
                m.push(b)?;
                m.push(a)?;
            }
            Instr::Add => m.binary(|a, b| a.checked_add(b).ok_or_else(overflow))?,
            Instr::Sub => m.binary(|a, b| a.checked_sub(b).ok_or_else(overflow))?,
            Instr::Mul => m.binary(|a, b| a.checked_mul(b).ok_or_else(overflow))?,
            Instr::Div => m.binary(|a, b| {
                if b == 0 {
                    return Err(fault("division by zero"));
                }
                a.checked_div(b).ok_or_else(overflow)
            })?,
            Instr::Rem => m.binary(|a, b| {
                if b == 0 {
                    return Err(fault("division by zero"));
                }
                a.checked_rem(b).ok_or_else(overflow)
            })?,
            Instr::Neg => {
                let v = m.pop()?;
                m.push(v.checked_neg().ok_or_else(overflow)?)?;
            }
            Instr::Eq => m.binary(|a, b| Ok(i64::from(a == b)))?,
            Instr::Lt => m.binary(|a, b| Ok(i64::from(a < b)))?,
            Instr::Gt => m.binary(|a, b| Ok(i64::from(a > b)))?,
            Instr::Load(slot) => {
                let v = *frame
                    .locals
                    .get(*slot as usize)
                    .ok_or_else(|| fault(format!("local slot {slot} out of range")))?;
                m.push(v)?;
            }
            Instr::Store(slot) => {
                let v = m.pop()?;
                let cell = frame
                    .locals
                    .get_mut(*slot as usize)
                    .ok_or_else(|| fault(format!("local slot {slot} out of range")))?;
                *cell = v;
            }
            Instr::Arg(i) => {
                let raw = options
                    .args
                    .get(*i as usize)
                    .ok_or_else(|| fault(format!("argument {i} not provided")))?;
                let v = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| fault(format!("argument {i} is not an integer: {raw}")))?;
                m.push(v)?;
            }
            Instr::Jmp(target) | Instr::Jz(target) | Instr::Jnz(target) => {
                let take = match instr {
                    Instr::Jz(_) => m.pop()? == 0,
                    Instr::Jnz(_) => m.pop()? != 0,
                    _ => true,
                };
                if *target > body.len() {
                    return Err(fault(format!("jump target {target} out of range")));
                }
                if take {
                    frame.pc = *target;
                }
            }
            Instr::Call(callee) => {
                let func = unit
                    .functions
                    .get(*callee)
                    .ok_or_else(|| fault(format!("call to unknown function #{callee}")))?;
                if frames.len() >= options.limits.max_call_depth {
                    return Err(Trap::ResourceExhausted(format!(
                        "call depth limit of {} exceeded",
                        options.limits.max_call_depth
                    )));
                }
                frames.push(Frame {
                    func: *callee,
                    pc: 0,
                    locals: vec![0; func.locals as usize],
                });
            }
            Instr::Ret => {
                frames.pop();
            }
            Instr::Print => {
                let v = m.pop()?;
                writeln!(out, "{v}")?;
            }
            // Literals are written as a whole line.
            Instr::Emit(text) => writeln!(out, "{text}")?,
            Instr::Frame => {
                let env = options.environment.as_ref().ok_or_else(|| {
                    Trap::ConfigMismatch(ConfigMismatchError {
                        reason: "frame requires the headless execution environment".to_string(),
                    })
                })?;
                writeln!(
                    out,
                    "frame {frames_rendered} {} {}% {} {}",
                    env.graphics_backend,
                    env.display_scale,
                    env.font_rendering,
                    env.automation_backend
                )?;
                frames_rendered += 1;
            }
            Instr::Sleep(ms) => std::thread::sleep(Duration::from_millis(*ms)),
            Instr::Fail(msg) => return Err(fault(msg.clone())),
            Instr::Halt => break,
            Instr::LogInvocation(n) => {
                let n = *n as usize;
                if m.stack.len() < n {
                    return Err(fault("operand stack underflow"));
                }
                if log.len() >= MAX_LOGGED_INVOCATIONS {
                    return Err(Trap::ResourceExhausted(format!(
                        "invocation log limit of {MAX_LOGGED_INVOCATIONS} exceeded"
                    )));
                }
                log.push(Invocation {
                    function: unit.functions[frame.func].name.clone(),
                    operands: m.stack[m.stack.len() - n..].to_vec(),
                });
            }
            Instr::Checkpoint => {
                if let Some(budget) = options.budget {
                    if started.elapsed() > budget {
                        return Err(Trap::SoftTimeout {
                            budget_ms: budget.as_millis() as u64,
                        });
                    }
                }
            }
        }
    }

    out.flush()?;
    Ok(())
}
