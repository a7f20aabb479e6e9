//! Differential tests: instrumented and original units behave identically
//! whenever no budget is exhausted.

mod common;

use std::time::Duration;

use gradebox_core::instrument::rewrite;
use gradebox_core::unit::{compile_unit, execute, Trap, Unit, VmLimits, VmOptions};

const PROGRAMS: &[(&str, &str, &[&str])] = &[
    ("print", common::PRINT_42, &[]),
    ("args", common::ADD_ARGS, &["19", "23"]),
    (
        "countdown",
        r#"
fn main locals=1
  arg 0
  store 0
top:
  load 0
  jz done
  load 0
  print
  load 0
  push 1
  sub
  store 0
  jmp top
done:
  emit "liftoff"
end
"#,
        &["5"],
    ),
    (
        "factorial",
        r#"
fn main
  arg 0
  call fact
  print
end

fn fact locals=1
  store 0
  load 0
  push 2
  lt
  jz recurse
  push 1
  ret
recurse:
  load 0
  load 0
  push 1
  sub
  call fact
  mul
end
"#,
        &["12"],
    ),
    (
        "nested_loops",
        r#"
# prints i*j for i, j in 1..=3
fn main locals=2
  push 1
  store 0
outer:
  load 0
  push 4
  lt
  jz finished
  push 1
  store 1
inner:
  load 1
  push 4
  lt
  jz next_row
  load 0
  load 1
  mul
  print
  load 1
  push 1
  add
  store 1
  jmp inner
next_row:
  load 0
  push 1
  add
  store 0
  jmp outer
finished:
end
"#,
        &[],
    ),
    (
        "forward_branches_only",
        r#"
fn main
  arg 0
  jnz nonzero
  emit "zero"
  halt
nonzero:
  emit "nonzero"
end
"#,
        &["7"],
    ),
    ("fault", common::DIVIDE_BY_ZERO, &[]),
    (
        "fault_after_output",
        "fn main\n  emit \"partial\"\n  fail \"boom\"\nend\n",
        &[],
    ),
];

fn run(unit: &Unit, args: &[&str], budget: Option<Duration>) -> (Result<(), Trap>, Vec<u8>) {
    let options = VmOptions {
        args: args.iter().map(|a| a.to_string()).collect(),
        limits: VmLimits::default(),
        budget,
        environment: None,
    };
    let mut out = Vec::new();
    let result = execute(unit, "main", &options, &mut out);
    (result, out)
}

#[test]
fn instrumented_programs_match_originals() {
    for (name, src, args) in PROGRAMS {
        let original = compile_unit(name, src).unwrap();
        let instrumented = rewrite(&original).unwrap();
        assert!(instrumented.checkpoint_count() > 0, "{name}: no checkpoints");

        let expected = run(&original, args, None);
        for budget in [None, Some(Duration::from_secs(60))] {
            let actual = run(&instrumented, args, budget);
            assert_eq!(actual, expected, "{name} diverged under budget {budget:?}");
        }
    }
}

#[test]
fn every_backward_branch_is_preceded_by_a_checkpoint() {
    for (name, src, _) in PROGRAMS {
        let unit = rewrite(&compile_unit(name, src).unwrap()).unwrap();
        for func in &unit.functions {
            assert_eq!(func.body.first(), Some(&gradebox_core::unit::Instr::Checkpoint));
            for (i, instr) in func.body.iter().enumerate() {
                if let Some(target) = instr.jump_target() {
                    if target <= i {
                        assert_eq!(
                            func.body[i - 1],
                            gradebox_core::unit::Instr::Checkpoint,
                            "{name}::{} backward branch at {i} unguarded",
                            func.name
                        );
                    }
                }
            }
        }
    }
}

#[test]
fn exhausted_budget_stops_at_a_checkpoint() {
    let unit = rewrite(&compile_unit("spin", common::SPIN).unwrap()).unwrap();
    let (result, _) = run(&unit, &[], Some(Duration::from_millis(30)));
    assert_eq!(result, Err(Trap::SoftTimeout { budget_ms: 30 }));
}

#[test]
fn uninstrumented_unit_ignores_budget() {
    let unit = compile_unit("countdown", PROGRAMS[2].1).unwrap();
    let (result, out) = run(&unit, &["3"], Some(Duration::ZERO));
    result.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "3\n2\n1\nliftoff\n");
}
