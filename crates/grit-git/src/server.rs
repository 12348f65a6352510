//! Server side of upload-pack and receive-pack.
//!
//! A session serves one exchange against a shared [`Storer`]. Sessions are
//! not reentrant; concurrent clients each get their own.

use crate::advrefs::AdvRefs;
use crate::capability::{Capability, CapabilityList, DEFAULT_AGENT};
use crate::pack::{encode_objects, Decoder, PackConfig};
use crate::report_status::{CommandStatus, ReportStatus};
use crate::revlist;
use crate::update::{Command, CommandAction, ReferenceUpdateRequest};
use crate::upload::{Depth, UploadPackRequest, UploadPackResponse};
use crate::{GitError, Result};
use grit_storage::{
    resolve_reference, validate_reference_name, ObjectId, ObjectType, Reference, Storer, Tag,
    HEAD, TAG_PREFIX,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const UPLOAD_PACK_CAPABILITIES: [Capability; 4] = [
    Capability::OfsDelta,
    Capability::Sideband,
    Capability::Sideband64k,
    Capability::NoProgress,
];

const RECEIVE_PACK_CAPABILITIES: [Capability; 3] = [
    Capability::OfsDelta,
    Capability::ReportStatus,
    Capability::DeleteRefs,
];

/// Serves fetches: advertises references and builds packs.
pub struct UploadPackSession<S: ?Sized> {
    storer: Arc<S>,
    config: PackConfig,
    advertised: bool,
}

impl<S: Storer + ?Sized> UploadPackSession<S> {
    /// Creates a session over `storer`.
    pub fn new(storer: Arc<S>, config: PackConfig) -> Self {
        Self {
            storer,
            config,
            advertised: false,
        }
    }

    /// Capabilities this server supports.
    pub fn capabilities() -> Result<CapabilityList> {
        supported_capabilities(&UPLOAD_PACK_CAPABILITIES)
    }

    /// Lists references and capabilities. May be called once per session.
    pub fn advertised_references(&mut self) -> Result<AdvRefs> {
        if self.advertised {
            return Err(already_called());
        }
        self.advertised = true;
        advertise(&*self.storer, Self::capabilities()?)
    }

    /// Computes the objects the client lacks and packs them.
    ///
    /// Shallow and deepen requests are refused. The advertisement does not
    /// have to precede this call; stateless transports ask in a separate
    /// request.
    pub fn upload_pack(&mut self, request: &UploadPackRequest) -> Result<UploadPackResponse> {
        if request.is_empty() {
            return Err(GitError::InvalidRequest(
                "empty upload-pack request".to_string(),
            ));
        }
        request.validate()?;
        check_capabilities(&Self::capabilities()?, &request.request.capabilities)?;
        let shallow_requested = !matches!(request.request.depth, Depth::Infinite | Depth::Commits(0));
        if !request.request.shallows.is_empty() || shallow_requested {
            return Err(GitError::InvalidRequest("shallow not supported".to_string()));
        }

        let ids = revlist::objects(&*self.storer, &request.request.wants, &request.haves)?;
        let mut pack = Vec::new();
        let checksum = encode_objects(&*self.storer, &ids, &self.config, &mut pack)?;
        info!(
            wants = request.request.wants.len(),
            haves = request.haves.len(),
            objects = ids.len(),
            bytes = pack.len(),
            %checksum,
            "pack built"
        );

        Ok(UploadPackResponse {
            shallows: Vec::new(),
            pack,
        })
    }
}

/// Serves pushes: stores the pushed pack and updates references.
pub struct ReceivePackSession<S: ?Sized> {
    storer: Arc<S>,
    config: PackConfig,
    advertised: bool,
}

impl<S: Storer + ?Sized> ReceivePackSession<S> {
    /// Creates a session over `storer`.
    pub fn new(storer: Arc<S>, config: PackConfig) -> Self {
        Self {
            storer,
            config,
            advertised: false,
        }
    }

    /// Capabilities this server supports.
    pub fn capabilities() -> Result<CapabilityList> {
        supported_capabilities(&RECEIVE_PACK_CAPABILITIES)
    }

    /// Lists references and capabilities. May be called once per session.
    pub fn advertised_references(&mut self) -> Result<AdvRefs> {
        if self.advertised {
            return Err(already_called());
        }
        self.advertised = true;
        advertise(&*self.storer, Self::capabilities()?)
    }

    /// Unpacks the request pack, then applies each command in order.
    ///
    /// Each command is checked against the current value of its reference
    /// right before it is applied. One failing command does not stop the
    /// others, and there is no rollback: updates are not atomic. A pack that
    /// fails to unpack fails every command.
    pub fn receive_pack(&mut self, request: &ReferenceUpdateRequest) -> Result<ReportStatus> {
        check_capabilities(&Self::capabilities()?, &request.capabilities)?;

        let mut report = ReportStatus::new();
        if !request.pack.is_empty() {
            let unpacked = Decoder::new(&request.pack)
                .with_max_objects(self.config.max_objects)
                .decode(&*self.storer);
            match unpacked {
                Ok(summary) => info!(objects = summary.objects.len(), "pack decoded"),
                Err(e) => {
                    warn!(error = %e, "unpack failed");
                    report.unpack_status = e.to_string();
                    report.command_statuses = request
                        .commands
                        .iter()
                        .map(|c| CommandStatus::failed(&c.name, "unpacker error"))
                        .collect();
                    return Ok(report);
                }
            }
        }

        let delete_allowed = request.capabilities.supports(Capability::DeleteRefs);
        for command in &request.commands {
            let status = match self.apply(command, delete_allowed) {
                Ok(()) => CommandStatus::ok(&command.name),
                Err(reason) => {
                    warn!(reference = %command.name, %reason, "command rejected");
                    CommandStatus::failed(&command.name, reason)
                }
            };
            report.command_statuses.push(status);
        }
        info!(
            commands = request.commands.len(),
            ok = report.command_statuses.iter().filter(|s| s.is_ok()).count(),
            "references updated"
        );
        Ok(report)
    }

    /// Compare-and-set of one reference. The error is the status reason.
    fn apply(&self, command: &Command, delete_allowed: bool) -> std::result::Result<(), String> {
        let storer = &*self.storer;
        if command.name == HEAD {
            return Err("funny refname".to_string());
        }
        validate_reference_name(&command.name).map_err(|_| "funny refname".to_string())?;

        let current = match resolve_reference(storer, &command.name) {
            Ok(id) => Some(id),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.to_string()),
        };

        match command.action() {
            CommandAction::Invalid => return Err("invalid command".to_string()),
            CommandAction::Create if current.is_some() => {
                return Err("reference already exists".to_string());
            }
            CommandAction::Update | CommandAction::Delete if current.is_none() => {
                return Err("reference did not exist".to_string());
            }
            CommandAction::Update | CommandAction::Delete if current != Some(command.old) => {
                return Err("failed to update ref".to_string());
            }
            CommandAction::Delete if !delete_allowed => {
                return Err("delete not supported".to_string());
            }
            _ => {}
        }

        if command.action() == CommandAction::Delete {
            storer
                .remove_reference(&command.name)
                .map_err(|e| e.to_string())?;
            debug!(reference = %command.name, "reference deleted");
            return Ok(());
        }

        match storer.has_object(&command.new) {
            Ok(true) => {}
            Ok(false) => return Err("missing necessary objects".to_string()),
            Err(e) => return Err(e.to_string()),
        }
        storer
            .set_reference(&command.name, Reference::Direct(command.new))
            .map_err(|e| e.to_string())?;
        debug!(reference = %command.name, new = %command.new, "reference updated");
        Ok(())
    }
}

fn already_called() -> GitError {
    GitError::Protocol("advertised references already called".to_string())
}

fn supported_capabilities(capabilities: &[Capability]) -> Result<CapabilityList> {
    let mut list = CapabilityList::new();
    list.set(Capability::Agent, vec![DEFAULT_AGENT.to_string()])?;
    for capability in capabilities {
        list.add_flag(*capability)?;
    }
    Ok(list)
}

fn check_capabilities(supported: &CapabilityList, requested: &CapabilityList) -> Result<()> {
    match requested.iter().find(|c| !supported.supports(*c)) {
        Some(capability) => Err(GitError::UnsupportedCapability(capability.to_string())),
        None => Ok(()),
    }
}

fn advertise<S: Storer + ?Sized>(storer: &S, capabilities: CapabilityList) -> Result<AdvRefs> {
    let mut adv = AdvRefs::new();
    adv.capabilities = capabilities;

    for (name, reference) in storer.list_references()? {
        let Reference::Direct(id) = reference else {
            continue;
        };
        if name == HEAD {
            continue;
        }
        if name.starts_with(TAG_PREFIX) {
            if let Some(peeled) = peel(storer, id)? {
                adv.peeled.insert(name.clone(), peeled);
            }
        }
        adv.references.insert(name, id);
    }

    match storer.reference(HEAD) {
        Ok(head) => {
            adv.add_reference(HEAD, &head)?;
            match resolve_reference(storer, HEAD) {
                Ok(id) => adv.head = Some(id),
                // Unborn branch.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    debug!(
        references = adv.references.len(),
        peeled = adv.peeled.len(),
        "references advertised"
    );
    Ok(adv)
}

/// Follows annotated tags down to the first non-tag object.
fn peel<S: Storer + ?Sized>(storer: &S, id: ObjectId) -> Result<Option<ObjectId>> {
    let mut object = storer.object(&id)?;
    if object.object_type != ObjectType::Tag {
        return Ok(None);
    }
    while object.object_type == ObjectType::Tag {
        let target = Tag::decode(&object)?.target;
        object = storer.object(&target)?;
    }
    Ok(Some(object.id))
}
