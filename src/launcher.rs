//! Launching auxiliary programs (terminal, launcher, screenshot tool...).

use std::process::{Child, Command};

use anyhow::{bail, Context, Result};

/// Starts a command line on a given X display
pub trait Launcher {
    fn launch(&mut self, command: &str, display: &str) -> Result<()>;

    /// Collect children that have exited. Called once per loop iteration.
    fn reap(&mut self) {}
}

/// `DISPLAY` value naming `screen` of the display `name`
pub fn screen_display(name: &str, screen: usize) -> String {
    let base = match name.rfind(':') {
        Some(colon) => match name[colon..].find('.') {
            Some(dot) => &name[..colon + dot],
            None => name,
        },
        None => name,
    };
    format!("{}.{}", base, screen)
}

/// Split a command line into words, expanding a leading `~` in each
fn command_words(command: &str) -> Vec<String> {
    command
        .split_whitespace()
        .map(|word| shellexpand::tilde(word).into_owned())
        .collect()
}

/// Spawns detached child processes and reaps them when they exit
#[derive(Debug, Default)]
pub struct ProcessLauncher {
    children: Vec<Child>,
}

impl ProcessLauncher {
    /// Children spawned and not yet reaped
    #[cfg(test)]
    pub fn running(&self) -> usize {
        self.children.len()
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, command: &str, display: &str) -> Result<()> {
        let words = command_words(command);
        let Some((program, args)) = words.split_first() else {
            bail!("empty command");
        };
        log::info!("Spawning '{}' on DISPLAY={}", command, display);

        let mut cmd = Command::new(program);
        cmd.args(args).env("DISPLAY", display);

        // New session, so children outlive us and don't share our terminal
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", command))?;
        self.children.push(child);
        Ok(())
    }

    fn reap(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("Child {} exited: {}", child.id(), status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!("Failed to check child {}: {}", child.id(), e);
                false
            }
        });
    }
}
