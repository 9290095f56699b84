//! Shell-level actions: the OS mixer and powering off

use crate::error::{RadioError, RadioResult};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Run `command` through `sh -c`; a non-zero exit is a rejected command.
pub async fn run_shell(command: &str) -> RadioResult<()> {
    debug!(command, "running shell command");
    let output = Command::new("sh").arg("-c").arg(command).output().await?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(RadioError::rejected(
            command,
            format!("{}: {}", output.status, stderr.trim()),
        ))
    }
}

/// Substitute a percentage into a mixer command template
pub fn render_mixer_command(template: &str, percent: u8) -> String {
    template.replace("{volume}", &percent.to_string())
}

/// Sets the system output volume
#[derive(Debug, Clone)]
pub enum Mixer {
    /// Runs a shell template with `{volume}` replaced by a percentage
    Shell(String),
    /// Only logs the requested volume
    Log,
}

impl Mixer {
    pub fn from_template(template: Option<&str>) -> Self {
        match template {
            Some(t) => Mixer::Shell(t.to_string()),
            None => Mixer::Log,
        }
    }

    pub async fn set_volume(&self, percent: u8) -> RadioResult<()> {
        match self {
            Mixer::Shell(template) => run_shell(&render_mixer_command(template, percent)).await,
            Mixer::Log => {
                debug!(percent, "system volume");
                Ok(())
            }
        }
    }
}

/// What to do once the low-volume timer fires
#[derive(Debug, Clone)]
pub struct PowerOff {
    command: Option<String>,
}

impl PowerOff {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    /// Invoked once; failures are only logged.
    pub async fn run(&self) {
        match &self.command {
            Some(command) => {
                info!(command = %command, "powering off");
                if let Err(e) = run_shell(command).await {
                    warn!(error = %e, "power off failed");
                }
            }
            None => info!("power off requested; no shutdown command configured"),
        }
    }
}
