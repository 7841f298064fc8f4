use std::{
    fmt,
    process::{Command, Stdio},
};

use anyhow::Result;
use execute::Execute;
use log::info;
use serde::Serialize;

use crate::error::Error;

/// A single external command: program plus its argument vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: &str) -> Invocation {
        Invocation {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Invocation {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn flag<S: Into<String>>(self, name: &str, value: S) -> Invocation {
        self.arg(name).arg(value)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.args.iter().any(|arg| arg == name)
    }

    /// Value following `name`, if `name` is present and not the last arg.
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == name)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Leading positional args, e.g. `vm create`.
    pub fn subcommand(&self) -> String {
        self.args
            .iter()
            .take_while(|arg| !arg.starts_with('-'))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Single-quotes `arg` unless every char is shell-safe.
fn shell_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Runs invocations and hands back their stdout.
pub trait Executor: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<String>;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandExecutor;

impl Executor for CommandExecutor {
    fn run(&self, invocation: &Invocation) -> Result<String> {
        info!("run: {}", invocation);

        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let output = command.execute_output().map_err(|source| Error::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
            Some(status) => Err(Error::CommandFailed {
                command: invocation.to_string(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into()),
            None => Err(Error::Interrupted(invocation.to_string()).into()),
        }
    }
}
