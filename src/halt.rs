// Privileged system halt
// SPDX-License-Identifier: GPL-3.0-or-later

use std::io;
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;

use crate::config::MonitorConfig;
use crate::helpers::{am_i_root, find_executable, HelperError};
use crate::{info, warn};

#[derive(Error, Debug)]
pub enum HaltError {
    #[error("Halt command not found: {0}")]
    NotFound(String),
    #[error("Cannot run {0}: {1}")]
    Spawn(String, io::Error),
    #[error("{0} exited with {1}")]
    Failed(String, ExitStatus),
}

pub type Result<T> = std::result::Result<T, HaltError>;

/// The one externally visible action of the monitor
pub trait HaltAction {
    fn halt(&mut self) -> Result<()>;

    fn describe(&self) -> String;
}

/// Runs the configured halt command after flushing filesystems
#[derive(Debug, Clone)]
pub struct CommandHalt {
    argv: Vec<String>,
}

impl CommandHalt {
    /// Fails early if the executable cannot be found
    pub fn new(argv: Vec<String>) -> Result<Self> {
        match argv.first() {
            Some(program) if find_executable(program).is_some() => Ok(Self { argv }),
            Some(program) => Err(HaltError::NotFound(program.clone())),
            None => Err(HaltError::NotFound(String::new())),
        }
    }
}

impl HaltAction for CommandHalt {
    fn halt(&mut self) -> Result<()> {
        let command = self.describe();
        info!("Halt: sync and run '{}'", command);
        nix::unistd::sync();

        let status = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::null())
            .status()
            .map_err(|e| HaltError::Spawn(command.clone(), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(HaltError::Failed(command, status))
        }
    }

    fn describe(&self) -> String {
        self.argv.join(" ")
    }
}

/// Logs instead of halting; used for wiring tests
#[derive(Debug, Clone)]
pub struct DryRunHalt {
    argv: Vec<String>,
}

impl DryRunHalt {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl HaltAction for DryRunHalt {
    fn halt(&mut self) -> Result<()> {
        warn!("Halt: dry run, not running '{}'", self.describe());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("dry-run: {}", self.argv.join(" "))
    }
}

/// Refuse to start without the rights to halt, instead of finding out at halt time
pub fn check_privilege(dry_run: bool) -> std::result::Result<(), HelperError> {
    if dry_run {
        return Ok(());
    }
    am_i_root()
}

/// Build the halt action selected by the configuration
pub fn from_config(config: &MonitorConfig) -> Result<Box<dyn HaltAction>> {
    if config.dry_run {
        Ok(Box::new(DryRunHalt::new(config.halt_command.clone())))
    } else {
        Ok(Box::new(CommandHalt::new(config.halt_command.clone())?))
    }
}
