//! Transports that run `git-upload-pack`/`git-receive-pack` somewhere and
//! speak the protocol over the command's stdin and stdout.

use crate::transport::{ReceivePackSession, Transport, UploadPackSession};
use crate::{AuthMethod, Endpoint, Result, TransportError};
use grit_git::{
    AdvRefs, Capability, GitError, PktLineReader, PktLineWriter, ReferenceUpdateRequest,
    ReportStatus, Service, UploadPackRequest, UploadPackResponse,
};
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Messages servers print to stderr when the repository does not exist.
const REPOSITORY_NOT_FOUND_MESSAGES: [&str; 7] = [
    "ERROR: Repository not found.",
    "conq: repository does not exist.",
    "does not appear to be a git repository",
    "Repository not found.",
    "ERR no such repository",
    "ERR access denied",
    "Gogs: Repository does not exist or you do not have access",
];

/// A running server command.
pub trait RemoteCommand: Send {
    /// Takes the command's stdin. Dropping it closes the stream.
    fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>>;

    /// Takes the command's stdout.
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Takes the command's stderr.
    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Waits for the command to exit.
    fn wait(&mut self) -> Result<()>;
}

/// Starts server commands for a transport.
pub trait Commander: Send + Sync {
    /// Starts `service` against the repository at `endpoint`.
    fn command(
        &self,
        service: Service,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn RemoteCommand>>;
}

/// A [`Transport`] over any [`Commander`].
pub struct CommandTransport<C> {
    commander: C,
}

impl<C: Commander> CommandTransport<C> {
    /// Creates a transport running commands through `commander`.
    pub fn new(commander: C) -> Self {
        Self { commander }
    }

    fn connect(
        &self,
        service: Service,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Connection> {
        debug!(%service, %endpoint, "starting remote command");
        let mut command = self.commander.command(service, endpoint, auth)?;
        let stdin = command.take_stdin();
        let stdout = command
            .take_stdout()
            .ok_or_else(|| TransportError::Command("stdout not available".to_string()))?;
        let stderr = command.take_stderr().map(drain);
        Ok(Connection {
            command,
            stdin,
            stdout,
            stderr,
            advertised: None,
            finished: false,
        })
    }
}

impl<C: Commander> Transport for CommandTransport<C> {
    fn new_upload_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn UploadPackSession>> {
        let connection = self.connect(Service::UploadPack, endpoint, auth)?;
        Ok(Box::new(CommandUploadPackSession { connection }))
    }

    fn new_receive_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn ReceivePackSession>> {
        let connection = self.connect(Service::ReceivePack, endpoint, auth)?;
        Ok(Box::new(CommandReceivePackSession { connection }))
    }
}

/// Returns true if `stderr` holds a known "no such repository" message.
pub fn is_repository_not_found(stderr: &str) -> bool {
    REPOSITORY_NOT_FOUND_MESSAGES
        .iter()
        .any(|message| stderr.contains(message))
}

/// Reads `stderr` to the end on its own thread.
fn drain(mut stderr: Box<dyn Read + Send>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut bytes) {
            warn!(error = %e, "failed to read remote stderr");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

struct Connection {
    command: Box<dyn RemoteCommand>,
    stdin: Option<Box<dyn Write + Send>>,
    stdout: Box<dyn Read + Send>,
    stderr: Option<JoinHandle<String>>,
    /// Set once the advertisement has been read: `Some(true)` if it was
    /// handed out by `advertised_references`.
    advertised: Option<bool>,
    finished: bool,
}

impl Connection {
    /// The server speaks first; every exchange starts by reading its
    /// advertisement.
    fn read_advertisement(&mut self) -> Result<AdvRefs> {
        match AdvRefs::decode(&mut PktLineReader::new(&mut self.stdout)) {
            Ok(adv) => Ok(adv),
            Err(GitError::EmptyAdvRefs) => Err(self.empty_advertisement_error()),
            Err(e) => Err(e.into()),
        }
    }

    /// Everything the command wrote to stderr. Blocks until it closes the
    /// stream; later calls return an empty string.
    fn stderr_output(&mut self) -> String {
        match self.stderr.take().map(JoinHandle::join) {
            Some(Ok(output)) => output,
            Some(Err(_)) => {
                warn!("stderr reader panicked");
                String::new()
            }
            None => String::new(),
        }
    }

    fn empty_advertisement_error(&mut self) -> TransportError {
        self.stdin = None;
        let output = self.stderr_output();
        let message = output.trim();
        if is_repository_not_found(message) {
            TransportError::RepositoryNotFound
        } else if message.is_empty() {
            TransportError::EmptyRemoteRepository
        } else {
            TransportError::Command(message.to_string())
        }
    }

    fn advertised_references(&mut self) -> Result<AdvRefs> {
        if self.advertised == Some(true) {
            return Err(TransportError::AdvertisedReferencesAlreadyCalled);
        }
        self.advertised = Some(true);
        self.read_advertisement()
    }

    fn ensure_advertisement(&mut self) -> Result<()> {
        if self.advertised.is_none() {
            self.read_advertisement()?;
            self.advertised = Some(false);
        }
        Ok(())
    }

    fn stdin(&mut self) -> Result<&mut Box<dyn Write + Send>> {
        self.stdin
            .as_mut()
            .ok_or_else(|| TransportError::Command("stdin already closed".to_string()))
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.stdin = None;
        let status = self.command.wait();
        let output = self.stderr_output();
        match status {
            Err(TransportError::Command(reason)) if !output.trim().is_empty() => Err(
                TransportError::Command(format!("{reason}: {}", output.trim())),
            ),
            other => other,
        }
    }

    /// Tells the server no request is coming, then waits for it.
    fn close(&mut self) -> Result<()> {
        if let Some(stdin) = self.stdin.as_mut() {
            let mut writer = PktLineWriter::new(stdin);
            // The server may already be gone.
            if let Err(e) = writer.flush_pkt().and_then(|_| writer.flush()) {
                debug!(error = %e, "flush on close failed");
            }
        }
        self.finish()
    }
}

impl Drop for Connection {
    /// Reaps the command when a session ends early, e.g. on a decode error.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stdin = None;
        // Closing stdout unblocks a command still writing to it.
        drop(std::mem::replace(&mut self.stdout, Box::new(io::empty())));
        if let Err(e) = self.command.wait() {
            debug!(error = %e, "remote command ended abnormally");
        }
    }
}

struct CommandUploadPackSession {
    connection: Connection,
}

impl UploadPackSession for CommandUploadPackSession {
    fn advertised_references(&mut self) -> Result<AdvRefs> {
        let adv = self.connection.advertised_references()?;
        if adv.is_empty() {
            return Err(TransportError::EmptyRemoteRepository);
        }
        Ok(adv)
    }

    fn upload_pack(&mut self, request: &UploadPackRequest) -> Result<UploadPackResponse> {
        if request.is_empty() {
            return Err(TransportError::EmptyUploadPackRequest);
        }
        request.validate()?;
        self.connection.ensure_advertisement()?;

        let stdin = self.connection.stdin()?;
        request.encode(&mut *stdin)?;
        stdin.flush()?;
        self.connection.stdin = None;

        let response = UploadPackResponse::decode(
            &mut self.connection.stdout,
            request.request.sideband(),
            None,
        )?;
        self.connection.finish()?;
        Ok(response)
    }

    fn close(&mut self) -> Result<()> {
        self.connection.close()
    }
}

struct CommandReceivePackSession {
    connection: Connection,
}

impl ReceivePackSession for CommandReceivePackSession {
    fn advertised_references(&mut self) -> Result<AdvRefs> {
        self.connection.advertised_references()
    }

    fn receive_pack(&mut self, request: &ReferenceUpdateRequest) -> Result<Option<ReportStatus>> {
        request.validate()?;
        self.connection.ensure_advertisement()?;

        let stdin = self.connection.stdin()?;
        request.encode(&mut *stdin)?;
        stdin.flush()?;
        self.connection.stdin = None;

        let report = if request.capabilities.supports(Capability::ReportStatus) {
            let report = ReportStatus::decode(&mut PktLineReader::new(&mut self.connection.stdout))?;
            Some(report)
        } else {
            None
        };
        self.connection.finish()?;
        Ok(report)
    }

    fn close(&mut self) -> Result<()> {
        self.connection.close()
    }
}
