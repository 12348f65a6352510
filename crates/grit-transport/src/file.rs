//! Local repositories, served in-process.

use crate::transport::{ReceivePackSession, Transport, UploadPackSession};
use crate::{AuthMethod, Endpoint, Result, TransportError};
use grit_git::{
    server, AdvRefs, PackConfig, ReferenceUpdateRequest, ReportStatus, UploadPackRequest,
    UploadPackResponse,
};
use grit_storage::{FilesystemStorage, StorageError};
use std::sync::Arc;
use tracing::debug;

/// Talks to repositories on the local filesystem by running the server
/// sessions directly against them.
#[derive(Debug, Clone, Default)]
pub struct FileTransport {
    config: PackConfig,
}

impl FileTransport {
    /// Creates a transport using `config` for the server side.
    pub fn new(config: PackConfig) -> Self {
        Self { config }
    }

    fn open(&self, endpoint: &Endpoint, auth: Option<&AuthMethod>) -> Result<Arc<FilesystemStorage>> {
        if let Some(auth) = auth {
            return Err(TransportError::InvalidAuthMethod(auth.name().to_string()));
        }
        debug!(path = %endpoint.path, "opening local repository");
        match FilesystemStorage::open(&endpoint.path) {
            Ok(storage) => Ok(Arc::new(storage.with_compression(self.config.compression))),
            Err(StorageError::RepositoryNotFound(_)) => Err(TransportError::RepositoryNotFound),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for FileTransport {
    fn new_upload_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn UploadPackSession>> {
        let storage = self.open(endpoint, auth)?;
        Ok(Box::new(FileUploadPackSession {
            inner: server::UploadPackSession::new(storage, self.config.clone()),
            advertised: false,
        }))
    }

    fn new_receive_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn ReceivePackSession>> {
        let storage = self.open(endpoint, auth)?;
        Ok(Box::new(FileReceivePackSession {
            inner: server::ReceivePackSession::new(storage, self.config.clone()),
            advertised: false,
        }))
    }
}

struct FileUploadPackSession {
    inner: server::UploadPackSession<FilesystemStorage>,
    advertised: bool,
}

impl UploadPackSession for FileUploadPackSession {
    fn advertised_references(&mut self) -> Result<AdvRefs> {
        if std::mem::replace(&mut self.advertised, true) {
            return Err(TransportError::AdvertisedReferencesAlreadyCalled);
        }
        let adv = self.inner.advertised_references()?;
        if adv.is_empty() {
            return Err(TransportError::EmptyRemoteRepository);
        }
        Ok(adv)
    }

    fn upload_pack(&mut self, request: &UploadPackRequest) -> Result<UploadPackResponse> {
        if request.is_empty() {
            return Err(TransportError::EmptyUploadPackRequest);
        }
        Ok(self.inner.upload_pack(request)?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct FileReceivePackSession {
    inner: server::ReceivePackSession<FilesystemStorage>,
    advertised: bool,
}

impl ReceivePackSession for FileReceivePackSession {
    fn advertised_references(&mut self) -> Result<AdvRefs> {
        if std::mem::replace(&mut self.advertised, true) {
            return Err(TransportError::AdvertisedReferencesAlreadyCalled);
        }
        Ok(self.inner.advertised_references()?)
    }

    fn receive_pack(&mut self, request: &ReferenceUpdateRequest) -> Result<Option<ReportStatus>> {
        let report = self.inner.receive_pack(request)?;
        let wanted = request
            .capabilities
            .supports(grit_git::Capability::ReportStatus);
        Ok(wanted.then_some(report))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
