use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, Output},
};

use anyhow::{anyhow, bail, Context, Error};
use log::{debug, trace};

use blkplan_api::{
    actiongraph::{render_command, CommandRunner},
    error::CommitError,
};

use crate::crate_private::Sealed;

/// Extension for `std::process::Output` to check the exit status and turn
/// failures into anyhow errors carrying the captured output.
///
/// Sealed: only implemented inside this crate.
pub trait OutputChecker: Sealed {
    fn is_success(&self) -> bool;

    /// Exit code, if the process exited normally.
    fn exit_code(&self) -> Option<i32>;

    /// Signal that terminated the process, if any.
    fn end_signal(&self) -> Option<i32>;

    fn output(&self) -> String {
        "".into()
    }

    fn error_output(&self) -> String {
        "".into()
    }

    /// All captured output, for error reports and logs.
    fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut report = String::with_capacity(stdout.len() + stderr.len() + 20);
        if !stdout.is_empty() {
            report += &format!("stdout:\n{stdout}\n");
        }
        if !stderr.is_empty() {
            if !report.is_empty() {
                report += "\n";
            }
            report += &format!("stderr:\n{stderr}\n");
        }
        report
    }

    fn check(&self) -> Result<(), Error> {
        if self.is_success() {
            return Ok(());
        }

        Err(match self.output_report() {
            report if !report.is_empty() => {
                anyhow!("Process output:\n{report}").context(self.explain_exit())
            }
            _ => anyhow!("(No output was captured)").context(self.explain_exit()),
        })
    }

    fn check_output(&self) -> Result<String, Error> {
        self.check()?;
        Ok(self.output())
    }

    fn explain_exit(&self) -> String {
        if let Some(code) = self.exit_code() {
            format!("process exited with status: {code}")
        } else if let Some(signal) = self.end_signal() {
            format!("process was terminated by signal: {signal}")
        } else {
            "process exited with unknown status".into()
        }
    }
}

impl Sealed for Output {}

impl OutputChecker for Output {
    fn is_success(&self) -> bool {
        self.status.success()
    }

    fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    fn end_signal(&self) -> Option<i32> {
        self.status.signal()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into()
    }

    fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into()
    }
}

impl Sealed for Result<Output, std::io::Error> {}

impl OutputChecker for Result<Output, std::io::Error> {
    fn is_success(&self) -> bool {
        self.as_ref().map(|output| output.is_success()).unwrap_or(false)
    }

    fn exit_code(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.exit_code())
    }

    fn end_signal(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.end_signal())
    }

    fn output(&self) -> String {
        self.as_ref().map(|output| output.output()).unwrap_or_default()
    }

    fn error_output(&self) -> String {
        self.as_ref()
            .map(|output| output.error_output())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), Error> {
        match self {
            Ok(output) => output.check(),
            Err(e) => bail!("Failed to execute process: {e}"),
        }
    }

    fn check_output(&self) -> Result<String, Error> {
        match self {
            Ok(output) => output.check_output(),
            Err(e) => bail!("Failed to execute process: {e}"),
        }
    }

    fn explain_exit(&self) -> String {
        match self {
            Ok(output) => output.explain_exit(),
            Err(e) => format!("Failed to execute process: {e}"),
        }
    }
}

pub trait RunAndCheck: Sealed {
    fn run_and_check(&mut self) -> Result<(), Error>;
    fn output_and_check(&mut self) -> Result<String, Error>;
    fn render_command(&self) -> String;
}

impl Sealed for Command {}

impl RunAndCheck for Command {
    fn run_and_check(&mut self) -> Result<(), Error> {
        self.output_and_check().map(|_| ())
    }

    fn output_and_check(&mut self) -> Result<String, Error> {
        let rendered = self.render_command();
        trace!("Executing '{rendered}'");
        let result = self.output();
        trace!(
            "Executed '{rendered}': {}. Report:\n{}",
            result.explain_exit(),
            result.output_report(),
        );
        result
            .check_output()
            .with_context(|| format!("Error when running: {rendered}"))
    }

    fn render_command(&self) -> String {
        let program = self.get_program().to_string_lossy();
        let args: Vec<_> = self.get_args().map(|arg| arg.to_string_lossy()).collect();
        let args: Vec<&str> = args.iter().map(|arg| arg.as_ref()).collect();
        render_command(&program, &args)
    }
}

/// Runs the commands of committed actions on the host.
#[derive(Debug, Default)]
pub struct SystemRunner {
    executed: usize,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands that completed successfully.
    pub fn executed(&self) -> usize {
        self.executed
    }
}

impl CommandRunner for SystemRunner {
    fn run(&mut self, program: &str, args: &[&str]) -> Result<(), CommitError> {
        let command = render_command(program, args);
        debug!("Running '{command}'");
        Command::new(program)
            .args(args)
            .run_and_check()
            .map_err(|e| CommitError::CommandFailed {
                command,
                body: format!("{e:?}"),
            })?;
        self.executed += 1;
        Ok(())
    }
}
