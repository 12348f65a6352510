//! SSH remotes, reached through the system `ssh` client.

use crate::command::{CommandTransport, Commander, RemoteCommand};
use crate::{AuthMethod, Endpoint, Result, TransportConfig, TransportError};
use grit_git::Service;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// The ssh transport: a [`CommandTransport`] spawning `ssh`.
pub type SshTransport = CommandTransport<SshCommander>;

/// Spawns `ssh [-p port] [-i key] [user@]host "git-xxx-pack '<path>'"`.
#[derive(Debug, Clone)]
pub struct SshCommander {
    program: String,
}

impl SshCommander {
    /// Uses the ssh program named in `config`.
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            program: config.ssh_command.clone(),
        }
    }

    /// Builds the process without starting it.
    pub fn build(
        &self,
        service: Service,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Command> {
        let mut user = endpoint.user.clone();
        let mut key = None;
        match auth {
            None => {}
            Some(AuthMethod::SshAgent { user: u }) => user = Some(u.clone()),
            Some(AuthMethod::SshKey { user: u, path }) => {
                user = Some(u.clone());
                key = Some(path.clone());
            }
            Some(other) => {
                return Err(TransportError::InvalidAuthMethod(other.name().to_string()))
            }
        }

        let mut command = Command::new(&self.program);
        if let Some(port) = endpoint.port {
            command.arg("-p").arg(port.to_string());
        }
        if let Some(key) = key {
            command.arg("-i").arg(key);
        }
        let destination = match user.filter(|u| !u.is_empty()) {
            Some(user) => format!("{user}@{}", endpoint.host),
            None => endpoint.host.clone(),
        };
        command
            .arg(destination)
            .arg(format!("{service} {}", quote(&endpoint.path)));
        Ok(command)
    }
}

impl Commander for SshCommander {
    fn command(
        &self,
        service: Service,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn RemoteCommand>> {
        let mut command = self.build(service, endpoint, auth)?;
        debug!(program = %self.program, host = %endpoint.host, %service, "spawning ssh");
        let child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Command(format!("{}: {e}", self.program)))?;
        Ok(Box::new(ChildCommand { child }))
    }
}

/// Single-quotes `path` for the remote shell.
fn quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

struct ChildCommand {
    child: Child,
}

impl RemoteCommand for ChildCommand {
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.child
            .stdin
            .take()
            .map(|s| Box::new(s) as Box<dyn Write + Send>)
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn wait(&mut self) -> Result<()> {
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(TransportError::Command(format!("ssh exited with {status}")))
        }
    }
}
