//! gradebox-sandbox: executes one unit entry point in a fresh process.
//!
//! Reads a JSON `SandboxRequest` from stdin. Program output goes to stdout;
//! on abnormal termination a one-line diagnostic goes to stderr and the
//! exit code tells the parent what happened (see `sandbox::protocol`).
//! Logged invocations go to `protocol::INVOCATION_LOG` in the working
//! directory, on the trap path too.

use std::io::{BufWriter, Read, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use gradebox_core::domain::ExecutionEnvironment;
use gradebox_core::sandbox::protocol::{self, SandboxRequest};
use gradebox_core::unit::{execute_logged, VmOptions};

fn main() -> ExitCode {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("gradebox-sandbox: {e:#}");
            protocol::EXIT_PROTOCOL
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

fn run() -> anyhow::Result<i32> {
    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .context("reading request")?;
    let request: SandboxRequest =
        serde_json::from_slice(&input).context("decoding request")?;

    // All four flags or none; a partial bundle must not reach the program.
    let environment = match ExecutionEnvironment::from_process_env() {
        Ok(environment) => environment,
        Err(e) => {
            eprintln!("{e}");
            return Ok(protocol::EXIT_CONFIG);
        }
    };

    let options = VmOptions {
        args: request.args,
        limits: request.limits,
        budget: request.budget_ms.map(Duration::from_millis),
        environment,
    };

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut log = Vec::new();
    let result = execute_logged(&request.unit, &request.entry, &options, &mut out, &mut log);
    out.flush().context("flushing program output")?;

    if !log.is_empty() {
        let encoded = serde_json::to_vec(&log).context("encoding invocation log")?;
        std::fs::write(protocol::INVOCATION_LOG, encoded).context("writing invocation log")?;
    }

    match result {
        Ok(()) => Ok(protocol::EXIT_OK),
        Err(trap) => {
            eprintln!("{trap}");
            Ok(protocol::exit_code(&trap))
        }
    }
}
