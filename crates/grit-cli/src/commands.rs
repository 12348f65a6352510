//! CLI command implementations.

use grit_git::{serve_receive_pack, serve_upload_pack, GitError, ServeOptions};
use grit_storage::{FilesystemStorage, StorageError};
use grit_transport::{
    fetch, push, AuthMethod, Endpoint, FetchOptions, FetchOutcome, PushOutcome, RefSpec,
    Registry, TransportConfig, TransportError,
};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to push some refs to {0}")]
    PushRejected(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Opens `dir`, writing new loose objects at the configured compression.
fn open_repository(config: &TransportConfig, dir: &Path) -> Result<FilesystemStorage> {
    Ok(FilesystemStorage::open(dir)?.with_compression(config.pack.compression))
}

/// Serve `git-upload-pack` for the repository at `dir` over stdin/stdout.
pub fn upload_pack(config: &TransportConfig, dir: &Path, options: ServeOptions) -> Result<()> {
    let storage = Arc::new(open_repository(config, dir)?);
    tracing::info!(path = %dir.display(), stateless = options.stateless_rpc, "serving upload-pack");
    let stdout = io::stdout();
    serve_upload_pack(storage, &config.pack, options, io::stdin().lock(), stdout.lock())?;
    Ok(())
}

/// Serve `git-receive-pack` for the repository at `dir` over stdin/stdout.
pub fn receive_pack(config: &TransportConfig, dir: &Path, options: ServeOptions) -> Result<()> {
    let storage = Arc::new(open_repository(config, dir)?);
    tracing::info!(path = %dir.display(), stateless = options.stateless_rpc, "serving receive-pack");
    let stdout = io::stdout();
    serve_receive_pack(storage, &config.pack, options, io::stdin().lock(), stdout.lock())?;
    Ok(())
}

/// Create an empty repository.
pub fn init(dir: &Path, out: &mut dyn Write) -> Result<()> {
    let storage = FilesystemStorage::init(dir)?;
    writeln!(
        out,
        "Initialized empty Git repository in {}",
        storage.path().display()
    )?;
    Ok(())
}

/// Print the references a remote advertises.
pub fn ls_remote(
    registry: &Registry,
    url: &str,
    auth: Option<&AuthMethod>,
    out: &mut dyn Write,
) -> Result<()> {
    let endpoint = Endpoint::parse(url)?;
    let transport = registry.transport_for(&endpoint)?;
    let mut session = transport.new_upload_pack_session(&endpoint, auth)?;
    let adv = match session.advertised_references() {
        Ok(adv) => adv,
        Err(TransportError::EmptyRemoteRepository) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    session.close()?;

    if let Some(head) = adv.head {
        writeln!(out, "{head}\tHEAD")?;
    }
    for (name, id) in &adv.references {
        writeln!(out, "{id}\t{name}")?;
        if let Some(peeled) = adv.peeled.get(name) {
            writeln!(out, "{peeled}\t{name}^{{}}")?;
        }
    }
    Ok(())
}

/// Fetch from `url` into the repository at `repo`.
pub fn fetch_into(
    registry: &Registry,
    url: &str,
    repo: &Path,
    auth: Option<&AuthMethod>,
    options: &FetchOptions,
    out: &mut dyn Write,
) -> Result<()> {
    let endpoint = Endpoint::parse(url)?;
    let storage = open_repository(registry.config(), repo)?;
    match fetch(registry, &endpoint, auth, &storage, options)? {
        FetchOutcome::AlreadyUpToDate => writeln!(out, "Already up to date.")?,
        FetchOutcome::Fetched {
            objects,
            updated_refs,
        } => {
            writeln!(out, "From {endpoint}")?;
            writeln!(out, "Received {objects} objects")?;
            for (name, id) in updated_refs {
                writeln!(out, " {} -> {name}", id.to_hex())?;
            }
        }
    }
    Ok(())
}

/// Push `refspecs` from the repository at `repo` to `url`.
pub fn push_from(
    registry: &Registry,
    url: &str,
    repo: &Path,
    refspecs: &[String],
    auth: Option<&AuthMethod>,
    out: &mut dyn Write,
) -> Result<()> {
    let endpoint = Endpoint::parse(url)?;
    let refspecs = refspecs
        .iter()
        .map(|spec| RefSpec::parse(spec))
        .collect::<grit_transport::Result<Vec<_>>>()?;
    let storage = open_repository(registry.config(), repo)?;

    match push(registry, &endpoint, auth, &storage, &refspecs)? {
        PushOutcome::AlreadyUpToDate => writeln!(out, "Already up to date.")?,
        PushOutcome::Pushed(report) => {
            writeln!(out, "To {endpoint}")?;
            if !report.unpack_status.is_empty() && report.unpack_status != "ok" {
                writeln!(out, " unpack failed: {}", report.unpack_status)?;
            }
            for status in &report.command_statuses {
                if status.is_ok() {
                    writeln!(out, " ok {}", status.reference)?;
                } else {
                    writeln!(out, " ! [rejected] {} ({})", status.reference, status.status)?;
                }
            }
            if !report.is_ok() {
                return Err(CliError::PushRejected(endpoint.to_string()));
            }
        }
    }
    Ok(())
}
