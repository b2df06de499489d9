use std::fmt;
use std::process::{Command, ExitStatus};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::DisplayPowerOptions;
use crate::error::DisplayPowerError;

type CommandRunner = Arc<dyn Fn(&str) -> Result<CommandOutput> + Send + Sync>;

#[derive(Debug, Clone)]
struct CommandOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Queries and switches the panel through shell commands.
#[derive(Clone)]
pub struct DisplayPowerController {
    options: DisplayPowerOptions,
    runner: CommandRunner,
}

impl fmt::Debug for DisplayPowerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayPowerController")
            .field("options", &self.options)
            .finish()
    }
}

impl DisplayPowerController {
    pub fn new(options: DisplayPowerOptions) -> Self {
        Self::with_runner(options, default_runner())
    }

    fn with_runner(options: DisplayPowerOptions, runner: CommandRunner) -> Self {
        Self { options, runner }
    }

    /// Current panel state. An unanswerable query counts as "on".
    pub fn is_on(&self) -> bool {
        match self.query() {
            Ok(on) => on,
            Err(err) => {
                warn!(error = %err, "display power state unknown; assuming on");
                true
            }
        }
    }

    pub fn query(&self) -> Result<bool, DisplayPowerError> {
        let command = self.options.query_command.as_str();
        let output = self.run(command)?;
        if !output.status.success() {
            return Err(DisplayPowerError::CommandFailed {
                command: command.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_power_state(&output.stdout).ok_or_else(|| {
            DisplayPowerError::Unavailable(format!(
                "unrecognised output from '{command}': {}",
                output.stdout.trim()
            ))
        })
    }

    pub fn set_on(&self, on: bool) -> Result<(), DisplayPowerError> {
        let command = if on {
            self.options.on_command.as_str()
        } else {
            self.options.off_command.as_str()
        };
        let output = self.run(command)?;
        if output.status.success() {
            info!(on, "display power switched");
            Ok(())
        } else {
            Err(DisplayPowerError::CommandFailed {
                command: command.to_string(),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn run(&self, command: &str) -> Result<CommandOutput, DisplayPowerError> {
        debug!(command, "running display power command");
        (self.runner)(command).map_err(|err| DisplayPowerError::Unavailable(format!("{err:#}")))
    }
}

/// Accepts `display_power=1`, `1`, `on` and their "off" counterparts.
fn parse_power_state(stdout: &str) -> Option<bool> {
    let value = stdout.trim();
    let value = value.rsplit('=').next().unwrap_or(value).trim();
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" => Some(true),
        "0" | "off" => Some(false),
        _ => None,
    }
}

fn default_runner() -> CommandRunner {
    Arc::new(|command| run_shell(command))
}

fn run_shell(command: &str) -> Result<CommandOutput> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;

    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
