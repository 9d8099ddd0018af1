use crate::error::CommitError;

/// Seam to the layer that runs external tools.
pub trait CommandRunner {
    fn run(&mut self, program: &str, args: &[&str]) -> Result<(), CommitError>;
}

/// Renders a command line for logs, quoting arguments with whitespace.
pub fn render_command(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runner that records commands instead of running them.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    commands: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<String> {
        self.commands
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, program: &str, args: &[&str]) -> Result<(), CommitError> {
        self.commands.push(render_command(program, args));
        Ok(())
    }
}
