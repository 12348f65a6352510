//! Stream handlers driving server sessions over a byte pipe.
//!
//! These back the `upload-pack`/`receive-pack` commands run over SSH, and
//! the smart HTTP endpoints when used with `stateless_rpc`.
//! See: https://git-scm.com/docs/http-protocol

use crate::advrefs::AdvRefs;
use crate::capability::Capability;
use crate::pack::PackConfig;
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::server::{ReceivePackSession, UploadPackSession};
use crate::update::ReferenceUpdateRequest;
use crate::upload::UploadPackRequest;
use crate::{GitError, Result};
use grit_storage::Storer;
use std::fmt;
use std::io::{Cursor, Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// The two smart services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// `git-upload-pack`: fetch and clone.
    UploadPack,
    /// `git-receive-pack`: push.
    ReceivePack,
}

impl Service {
    /// Service name as used in commands and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Content type of the `info/refs` response.
    pub fn advertisement_content_type(&self) -> String {
        format!("application/x-{}-advertisement", self.as_str())
    }

    /// Content type of the POST body.
    pub fn request_content_type(&self) -> String {
        format!("application/x-{}-request", self.as_str())
    }

    /// Content type of the POST response.
    pub fn result_content_type(&self) -> String {
        format!("application/x-{}-result", self.as_str())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(GitError::InvalidRequest(format!("unknown service: {other}"))),
        }
    }
}

/// How a stream handler behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeOptions {
    /// Request and response are separate exchanges (smart HTTP): no
    /// advertisement precedes the request.
    pub stateless_rpc: bool,
    /// Only write the advertisement, then stop.
    pub advertise_refs: bool,
}

/// Writes an advertisement. Stateless advertisements start with the
/// `# service=` banner and a flush, as smart HTTP expects.
pub fn advertise_refs<W: Write>(
    adv: &AdvRefs,
    service: Service,
    stateless: bool,
    writer: W,
) -> Result<()> {
    let mut writer = PktLineWriter::new(writer);
    if stateless {
        writer.write_line(&format!("# service={service}"))?;
        writer.flush_pkt()?;
    }
    adv.encode(&mut writer)?;
    writer.flush()
}

/// Serves one upload-pack exchange.
pub fn serve_upload_pack<S, R, W>(
    storer: Arc<S>,
    config: &PackConfig,
    options: ServeOptions,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    S: Storer + ?Sized,
    R: Read,
    W: Write,
{
    let mut session = UploadPackSession::new(storer, config.clone());
    if options.advertise_refs || !options.stateless_rpc {
        let adv = session.advertised_references()?;
        advertise_refs(&adv, Service::UploadPack, options.advertise_refs, &mut writer)?;
        if options.advertise_refs {
            return Ok(());
        }
    }

    let Some(reader) = peek_request(reader)? else {
        debug!("client closed the connection without a request");
        return Ok(());
    };
    let request = UploadPackRequest::decode(reader)?;
    let response = session.upload_pack(&request)?;
    let sideband = request.request.sideband();
    response.encode(&mut writer, sideband)?;
    info!(
        service = %Service::UploadPack,
        sideband = sideband.is_some(),
        "upload-pack finished"
    );
    Ok(())
}

/// Serves one receive-pack exchange.
pub fn serve_receive_pack<S, R, W>(
    storer: Arc<S>,
    config: &PackConfig,
    options: ServeOptions,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    S: Storer + ?Sized,
    R: Read,
    W: Write,
{
    let mut session = ReceivePackSession::new(storer, config.clone());
    if options.advertise_refs || !options.stateless_rpc {
        let adv = session.advertised_references()?;
        advertise_refs(&adv, Service::ReceivePack, options.advertise_refs, &mut writer)?;
        if options.advertise_refs {
            return Ok(());
        }
    }

    let Some(reader) = peek_request(reader)? else {
        debug!("client closed the connection without a request");
        return Ok(());
    };
    let request = ReferenceUpdateRequest::decode(reader)?;
    if request.commands.is_empty() {
        return Ok(());
    }
    let report = session.receive_pack(&request)?;
    if request.capabilities.supports(Capability::ReportStatus) {
        let mut writer = PktLineWriter::new(&mut writer);
        report.encode(&mut writer)?;
        writer.flush()?;
    }
    info!(service = %Service::ReceivePack, ok = report.is_ok(), "receive-pack finished");
    Ok(())
}

/// Reads the first pkt-line. Returns `None` if the client sent nothing or
/// only a flush, otherwise a reader that replays the line.
fn peek_request<R: Read>(reader: R) -> Result<Option<impl Read>> {
    let mut reader = PktLineReader::new(reader);
    let first = match reader.read()? {
        None | Some(PktLine::Flush) => return Ok(None),
        Some(line) => line,
    };
    let replay = Cursor::new(first.encode()?);
    Ok(Some(replay.chain(reader.into_inner())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report_status::ReportStatus;
    use crate::test_support::{commit, tree_with_blob};
    use crate::update::Command;
    use crate::upload::{UploadPackResponse, UploadRequest};
    use grit_storage::{
        resolve_reference, MemoryStorage, ObjectId, ObjectStorer, Reference, ReferenceStorer,
    };

    fn repo() -> (Arc<MemoryStorage>, ObjectId) {
        let storage = MemoryStorage::init("master").unwrap();
        let (tree, _) = tree_with_blob(&storage, "README", b"hello\n");
        let c1 = commit(&storage, tree, &[], "first\n");
        storage
            .set_reference("refs/heads/master", Reference::Direct(c1))
            .unwrap();
        (Arc::new(storage), c1)
    }

    #[test]
    fn test_service_names() {
        assert_eq!(Service::UploadPack.to_string(), "git-upload-pack");
        assert_eq!(
            "git-receive-pack".parse::<Service>().unwrap(),
            Service::ReceivePack
        );
        assert!("git-foo".parse::<Service>().is_err());
        assert_eq!(
            Service::UploadPack.advertisement_content_type(),
            "application/x-git-upload-pack-advertisement"
        );
        assert_eq!(
            Service::ReceivePack.result_content_type(),
            "application/x-git-receive-pack-result"
        );
    }

    #[test]
    fn test_stateless_advertisement_has_banner() {
        let (storage, c1) = repo();
        let options = ServeOptions {
            stateless_rpc: true,
            advertise_refs: true,
        };
        let mut out = Vec::new();
        serve_upload_pack(storage, &PackConfig::default(), options, &b""[..], &mut out).unwrap();
        assert!(out.starts_with(b"001e# service=git-upload-pack\n0000"));

        let mut reader = PktLineReader::new(Cursor::new(out));
        let adv = AdvRefs::decode(&mut reader).unwrap();
        assert_eq!(adv.head, Some(c1));
        assert_eq!(adv.prefix.len(), 2);
    }

    #[test]
    fn test_client_hangs_up_after_advertisement() {
        let (storage, _) = repo();
        let mut out = Vec::new();
        serve_upload_pack(
            storage,
            &PackConfig::default(),
            ServeOptions::default(),
            &b"0000"[..],
            &mut out,
        )
        .unwrap();
        let adv = AdvRefs::decode(&mut PktLineReader::new(Cursor::new(out))).unwrap();
        assert!(adv.prefix.is_empty());
        assert_eq!(adv.references.len(), 1);
    }

    #[test]
    fn test_stateless_upload_pack_with_sideband() {
        let (storage, c1) = repo();
        let mut request = UploadPackRequest::new();
        request.request = UploadRequest {
            wants: vec![c1],
            ..UploadRequest::new()
        };
        request
            .request
            .capabilities
            .add_flag(Capability::Sideband64k)
            .unwrap();
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();

        let options = ServeOptions {
            stateless_rpc: true,
            advertise_refs: false,
        };
        let mut out = Vec::new();
        serve_upload_pack(storage, &PackConfig::default(), options, &body[..], &mut out).unwrap();

        let response = UploadPackResponse::decode(
            Cursor::new(out),
            Some(crate::sideband::SidebandKind::Sideband64k),
            None,
        )
        .unwrap();
        let client = MemoryStorage::new();
        crate::pack::decode_from_reader(&response.pack[..], &client, 1000).unwrap();
        assert!(client.has_object(&c1).unwrap());
    }

    #[test]
    fn test_receive_pack_over_stream() {
        let (storage, c1) = repo();
        let mut request = ReferenceUpdateRequest::new();
        request
            .capabilities
            .add_flag(Capability::ReportStatus)
            .unwrap();
        request.commands = vec![Command::new("refs/heads/copy", ObjectId::ZERO, c1)];
        let mut input = Vec::new();
        request.encode(&mut input).unwrap();

        let options = ServeOptions {
            stateless_rpc: true,
            advertise_refs: false,
        };
        let mut out = Vec::new();
        serve_receive_pack(storage.clone(), &PackConfig::default(), options, &input[..], &mut out)
            .unwrap();

        let report = ReportStatus::decode(&mut PktLineReader::new(Cursor::new(out))).unwrap();
        assert!(report.is_ok());
        assert_eq!(resolve_reference(&*storage, "refs/heads/copy").unwrap(), c1);
    }
}
