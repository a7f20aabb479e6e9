//! Instrumentation layer: injects cooperative timeout checkpoints into IR.
//!
//! The rewrite inserts a `Checkpoint` at every function entry and in front
//! of every backward branch, then remaps branch targets. Every loop
//! iteration and every call therefore passes a checkpoint, so a program
//! that runs past its budget stops with a soft timeout instead of waiting
//! for the watchdog kill. Nothing else about the program changes.
//!
//! [`apply_hooks`] is the second, per-criterion pass. It runs before the
//! checkpoint rewrite and changes behaviour on purpose: delegated functions
//! take the reference body, substituted ones become stubs, logged ones
//! record their calls.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{ExecutionHooks, Substitution};
use crate::metrics::METRICS;
use crate::unit::{Function, Instr, Unit};

/// A unit cannot be safely rewritten.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstrumentationError {
    #[error("unit {unit} is not marked instrumented but contains checkpoints in {function}")]
    ForeignCheckpoint { unit: String, function: String },

    #[error("unit {unit}: function {function} has a branch to {target} past its end")]
    BranchOutOfRange {
        unit: String,
        function: String,
        target: usize,
    },

    #[error("unit {unit} has no function {function} to hook")]
    UnknownHookTarget { unit: String, function: String },

    #[error("no reference implementation of {unit}.{function}")]
    MissingReference { unit: String, function: String },
}

/// A unit ready for the sandbox plus the checkpoint budget it runs under.
#[derive(Debug, Clone)]
pub struct InstrumentedUnit {
    pub unit: Arc<Unit>,
    /// `None` when timeout enforcement is disabled
    pub budget: Option<Duration>,
}

fn rewrite_function(unit: &str, func: &Function) -> Result<Function, InstrumentationError> {
    let len = func.body.len();
    let backward = |i: usize, instr: &Instr| instr.jump_target().is_some_and(|t| t <= i);

    // new_index[i] is where old instruction i (or its checkpoint) lands.
    let mut new_index = Vec::with_capacity(len + 1);
    let mut next = 1; // entry checkpoint
    for (i, instr) in func.body.iter().enumerate() {
        if matches!(instr, Instr::Checkpoint) {
            return Err(InstrumentationError::ForeignCheckpoint {
                unit: unit.to_string(),
                function: func.name.clone(),
            });
        }
        new_index.push(next);
        next += if backward(i, instr) { 2 } else { 1 };
    }
    new_index.push(next);

    let mut body = Vec::with_capacity(next);
    body.push(Instr::Checkpoint);
    for (i, instr) in func.body.iter().enumerate() {
        let Some(target) = instr.jump_target() else {
            body.push(instr.clone());
            continue;
        };
        let mapped = *new_index
            .get(target)
            .ok_or_else(|| InstrumentationError::BranchOutOfRange {
                unit: unit.to_string(),
                function: func.name.clone(),
                target,
            })?;
        if backward(i, instr) {
            body.push(Instr::Checkpoint);
        }
        body.push(instr.retarget(mapped));
    }

    Ok(Function {
        name: func.name.clone(),
        locals: func.locals,
        body,
    })
}

/// Pure rewrite `unit -> unit'`.
///
/// Already-instrumented units are returned unchanged.
pub fn rewrite(unit: &Unit) -> Result<Unit, InstrumentationError> {
    if unit.instrumented {
        return Ok(unit.clone());
    }
    let functions = unit
        .functions
        .iter()
        .map(|f| rewrite_function(&unit.name, f))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Unit {
        name: unit.name.clone(),
        functions,
        instrumented: true,
    })
}

/// Instrument `unit` to stop cooperatively after `timeout`.
pub fn instrument(unit: &Unit, timeout: Duration) -> Result<InstrumentedUnit, InstrumentationError> {
    Ok(InstrumentedUnit {
        unit: Arc::new(rewrite(unit)?),
        budget: Some(timeout),
    })
}

/// Replace the listed functions of `unit` by the reference bodies.
///
/// Calls inside a reference body are resolved by name: to the submitted
/// function when the unit has one, otherwise to a copy of the reference
/// function appended to the unit.
fn delegate(
    unit: &mut Unit,
    reference: &Unit,
    names: &BTreeSet<String>,
) -> Result<(), InstrumentationError> {
    let unit_name = unit.name.clone();
    let missing = |function: &str| InstrumentationError::MissingReference {
        unit: unit_name.clone(),
        function: function.to_string(),
    };
    let mut queue: VecDeque<String> = names.iter().cloned().collect();
    let mut done = HashSet::new();
    while let Some(name) = queue.pop_front() {
        if !done.insert(name.clone()) {
            continue;
        }
        let (_, source) = reference.function(&name).ok_or_else(|| missing(&name))?;

        let mut body = Vec::with_capacity(source.body.len());
        for instr in &source.body {
            let Instr::Call(idx) = instr else {
                body.push(instr.clone());
                continue;
            };
            let callee = reference
                .functions
                .get(*idx)
                .map(|f| f.name.clone())
                .ok_or_else(|| missing(&format!("#{idx}")))?;
            let target = match unit.function(&callee) {
                Some((i, _)) => i,
                None => {
                    // Placeholder, filled when the queue reaches it.
                    unit.functions.push(Function {
                        name: callee.clone(),
                        locals: 0,
                        body: Vec::new(),
                    });
                    queue.push_back(callee);
                    unit.functions.len() - 1
                }
            };
            body.push(Instr::Call(target));
        }

        match unit.function_mut(&name) {
            Some(func) => {
                func.locals = source.locals;
                func.body = body;
            }
            None => unit.functions.push(Function {
                name,
                locals: source.locals,
                body,
            }),
        }
    }
    Ok(())
}

fn stub_body(stub: &Substitution) -> Vec<Instr> {
    std::iter::repeat(Instr::Pop)
        .take(stub.pop as usize)
        .chain(stub.push.iter().map(|v| Instr::Push(*v)))
        .collect()
}

fn hook_target<'a>(unit: &'a mut Unit, name: &str) -> Result<&'a mut Function, InstrumentationError> {
    let unit_name = unit.name.clone();
    unit.function_mut(name)
        .ok_or(InstrumentationError::UnknownHookTarget {
            unit: unit_name,
            function: name.to_string(),
        })
}

/// Apply a criterion's hooks to an uninstrumented unit.
///
/// Delegation runs first, then substitution, then logging, so a logged
/// function records its calls whichever body it ends up with.
pub fn apply_hooks(
    unit: &Unit,
    hooks: &ExecutionHooks,
    reference: Option<&Unit>,
) -> Result<Unit, InstrumentationError> {
    let mut out = unit.clone();

    if let Some(first) = hooks.reference.iter().next() {
        let reference = reference.ok_or_else(|| InstrumentationError::MissingReference {
            unit: unit.name.clone(),
            function: first.clone(),
        })?;
        delegate(&mut out, reference, &hooks.reference)?;
    }

    for (name, stub) in &hooks.substitute {
        let func = hook_target(&mut out, name)?;
        func.locals = 0;
        func.body = stub_body(stub);
    }

    for (name, operands) in &hooks.log {
        let func = hook_target(&mut out, name)?;
        let shifted = func
            .body
            .iter()
            .map(|instr| match instr.jump_target() {
                Some(target) => instr.retarget(target + 1),
                None => instr.clone(),
            });
        func.body = std::iter::once(Instr::LogInvocation(*operands))
            .chain(shifted)
            .collect();
    }

    Ok(out)
}

/// Per-run instrumentation with a cache keyed by unit name.
///
/// The rewritten IR does not depend on the timeout, so criteria sharing a
/// unit share one rewrite and only differ in budget.
#[derive(Debug)]
pub struct InstrumentationCache {
    enabled: bool,
    rewritten: HashMap<String, Arc<Unit>>,
    rewrites: usize,
}

impl InstrumentationCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            rewritten: HashMap::new(),
            rewrites: 0,
        }
    }

    /// Number of rewrites actually performed (cache misses).
    pub fn rewrites(&self) -> usize {
        self.rewrites
    }

    /// Prepare `unit` for a run under `timeout`.
    ///
    /// With enforcement disabled the unit passes through unmodified and
    /// without a budget; only the sandbox watchdog limits it then.
    pub fn prepare(
        &mut self,
        unit: &Arc<Unit>,
        timeout: Duration,
    ) -> Result<InstrumentedUnit, InstrumentationError> {
        if !self.enabled {
            return Ok(InstrumentedUnit {
                unit: Arc::clone(unit),
                budget: None,
            });
        }

        if let Some(cached) = self.rewritten.get(&unit.name) {
            return Ok(InstrumentedUnit {
                unit: Arc::clone(cached),
                budget: Some(timeout),
            });
        }

        let rewritten = Arc::new(rewrite(unit)?);
        self.rewrites += 1;
        METRICS.inc_units_instrumented();
        debug!(
            unit = %unit.name,
            checkpoints = rewritten.checkpoint_count(),
            "unit instrumented"
        );
        self.rewritten
            .insert(unit.name.clone(), Arc::clone(&rewritten));
        Ok(InstrumentedUnit {
            unit: rewritten,
            budget: Some(timeout),
        })
    }

    /// Like [`prepare`](Self::prepare), with the criterion's hooks applied
    /// first. Hooked units are cached per unit and hook set.
    pub fn prepare_with_hooks(
        &mut self,
        unit: &Arc<Unit>,
        hooks: &ExecutionHooks,
        reference: Option<&Unit>,
        timeout: Duration,
    ) -> Result<InstrumentedUnit, InstrumentationError> {
        if hooks.is_empty() {
            return self.prepare(unit, timeout);
        }
        let budget = self.enabled.then_some(timeout);
        let key = format!("{}|{hooks:?}", unit.name);
        if let Some(cached) = self.rewritten.get(&key) {
            return Ok(InstrumentedUnit {
                unit: Arc::clone(cached),
                budget,
            });
        }

        let hooked = apply_hooks(unit, hooks, reference)?;
        let prepared = if self.enabled {
            let rewritten = rewrite(&hooked)?;
            self.rewrites += 1;
            METRICS.inc_units_instrumented();
            rewritten
        } else {
            hooked
        };
        debug!(
            unit = %unit.name,
            logged = hooks.log.len(),
            substituted = hooks.substitute.len(),
            delegated = hooks.reference.len(),
            "hooks applied"
        );
        let prepared = Arc::new(prepared);
        self.rewritten.insert(key, Arc::clone(&prepared));
        Ok(InstrumentedUnit {
            unit: prepared,
            budget,
        })
    }
}
