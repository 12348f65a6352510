//! Client session traits every transport implements.

use crate::{AuthMethod, Endpoint, Result};
use grit_git::{AdvRefs, ReferenceUpdateRequest, ReportStatus, UploadPackRequest, UploadPackResponse};

/// Opens sessions against remote repositories of one kind.
pub trait Transport: Send + Sync {
    /// Starts a fetch session.
    fn new_upload_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn UploadPackSession>>;

    /// Starts a push session.
    fn new_receive_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn ReceivePackSession>>;
}

/// Client half of a fetch.
pub trait UploadPackSession: Send {
    /// Returns the remote's references. May be called once per session.
    ///
    /// Fails with [`EmptyRemoteRepository`](crate::TransportError::EmptyRemoteRepository)
    /// if the remote has no references.
    fn advertised_references(&mut self) -> Result<AdvRefs>;

    /// Sends the request and returns the pack.
    fn upload_pack(&mut self, request: &UploadPackRequest) -> Result<UploadPackResponse>;

    /// Ends the session.
    fn close(&mut self) -> Result<()>;
}

/// Client half of a push.
pub trait ReceivePackSession: Send {
    /// Returns the remote's references. May be called once per session.
    /// An empty advertisement is valid here: pushing creates the first refs.
    fn advertised_references(&mut self) -> Result<AdvRefs>;

    /// Sends the commands and pack. Returns the report when `report-status`
    /// was requested.
    fn receive_pack(&mut self, request: &ReferenceUpdateRequest) -> Result<Option<ReportStatus>>;

    /// Ends the session.
    fn close(&mut self) -> Result<()>;
}
