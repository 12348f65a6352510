//! Smart HTTP client.
//!
//! See: https://git-scm.com/docs/http-protocol

use crate::transport::{ReceivePackSession, Transport, UploadPackSession};
use crate::{AuthMethod, Endpoint, Result, TransportConfig, TransportError};
use grit_git::{
    AdvRefs, Capability, GitError, PktLineReader, ReferenceUpdateRequest, ReportStatus, Service,
    UploadPackRequest, UploadPackResponse,
};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

/// Talks to smart HTTP servers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Builds the HTTP client from `config`.
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Uses an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn session(
        &self,
        service: Service,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<HttpSession> {
        if let Some(auth) = auth.filter(|a| !a.is_http()) {
            return Err(TransportError::InvalidAuthMethod(auth.name().to_string()));
        }
        Ok(HttpSession {
            client: self.client.clone(),
            endpoint: endpoint.clone(),
            auth: auth.cloned(),
            service,
            advertised: false,
        })
    }
}

impl Transport for HttpTransport {
    fn new_upload_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn UploadPackSession>> {
        Ok(Box::new(self.session(Service::UploadPack, endpoint, auth)?))
    }

    fn new_receive_pack_session(
        &self,
        endpoint: &Endpoint,
        auth: Option<&AuthMethod>,
    ) -> Result<Box<dyn ReceivePackSession>> {
        Ok(Box::new(self.session(Service::ReceivePack, endpoint, auth)?))
    }
}

/// URL of the reference advertisement.
pub fn info_refs_url(endpoint: &Endpoint, service: Service) -> String {
    format!("{}/info/refs?service={service}", endpoint.base_url())
}

/// URL requests for `service` are posted to.
pub fn service_url(endpoint: &Endpoint, service: Service) -> String {
    format!("{}/{service}", endpoint.base_url())
}

/// Maps an HTTP status to an error. 2xx is success.
pub fn check_status(status: u16, url: &str) -> Result<()> {
    match status {
        200..=299 => Ok(()),
        401 => Err(TransportError::AuthenticationRequired),
        403 => Err(TransportError::AuthorizationFailed),
        404 => Err(TransportError::RepositoryNotFound),
        status => Err(TransportError::UnexpectedStatus {
            status,
            url: url.to_string(),
        }),
    }
}

struct HttpSession {
    client: Client,
    endpoint: Endpoint,
    auth: Option<AuthMethod>,
    service: Service,
    advertised: bool,
}

impl HttpSession {
    /// Explicit auth wins over credentials in the URL.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(AuthMethod::BasicAuth { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(AuthMethod::TokenAuth { token }) => request.bearer_auth(token),
            _ => match &self.endpoint.user {
                Some(user) => request.basic_auth(user, self.endpoint.password.as_ref()),
                None => request,
            },
        }
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Vec<u8>> {
        let response = self.authorize(request).send()?;
        check_status(response.status().as_u16(), url)?;
        Ok(response.bytes()?.to_vec())
    }

    fn fetch_advertisement(&mut self) -> Result<AdvRefs> {
        if self.advertised {
            return Err(TransportError::AdvertisedReferencesAlreadyCalled);
        }
        self.advertised = true;

        let url = info_refs_url(&self.endpoint, self.service);
        debug!(%url, "fetching advertisement");
        let body = self.send(self.client.get(&url), &url)?;
        decode_advertisement(body, self.service)
    }

    fn post(&self, body: Vec<u8>) -> Result<Vec<u8>> {
        let url = service_url(&self.endpoint, self.service);
        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, self.service.request_content_type())
            .header(ACCEPT, self.service.result_content_type())
            .body(body);
        let response = self.send(request, &url)?;
        info!(%url, bytes = response.len(), "request done");
        Ok(response)
    }
}

/// Decodes an `info/refs` body. A body holding only the service banner and
/// flushes is an empty repository, which upload-pack cannot serve.
fn decode_advertisement(body: Vec<u8>, service: Service) -> Result<AdvRefs> {
    let mut adv = match AdvRefs::decode(&mut PktLineReader::new(Cursor::new(body))) {
        Ok(adv) => adv,
        Err(GitError::EmptyAdvRefs) if service == Service::UploadPack => {
            return Err(TransportError::EmptyRemoteRepository)
        }
        Err(e) => return Err(e.into()),
    };
    // The `# service=` banner is HTTP framing, not part of the refs.
    adv.prefix.clear();
    Ok(adv)
}

impl UploadPackSession for HttpSession {
    fn advertised_references(&mut self) -> Result<AdvRefs> {
        let adv = self.fetch_advertisement()?;
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
        let mut body = Vec::new();
        request.encode(&mut body)?;
        let response = self.post(body)?;
        Ok(UploadPackResponse::decode(
            Cursor::new(response),
            request.request.sideband(),
            None,
        )?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ReceivePackSession for HttpSession {
    fn advertised_references(&mut self) -> Result<AdvRefs> {
        self.fetch_advertisement()
    }

    fn receive_pack(&mut self, request: &ReferenceUpdateRequest) -> Result<Option<ReportStatus>> {
        request.validate()?;
        let mut body = Vec::new();
        request.encode(&mut body)?;
        let response = self.post(body)?;
        if !request.capabilities.supports(Capability::ReportStatus) {
            return Ok(None);
        }
        let report = ReportStatus::decode(&mut PktLineReader::new(Cursor::new(response)))?;
        Ok(Some(report))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
