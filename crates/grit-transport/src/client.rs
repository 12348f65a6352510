//! Fetch and push drivers on top of the transport sessions.

use crate::refspec::RefSpec;
use crate::{AuthMethod, Endpoint, Registry, Result, TransportError};
use grit_git::{
    decode_from_reader, encode_objects, revlist, AdvRefs, Capability, CapabilityList, Command,
    CommandStatus, ReferenceUpdateRequest, ReportStatus, UploadPackRequest, DEFAULT_AGENT,
};
use grit_storage::{
    Commit, ObjectId, ObjectType, Reference, Storer, BRANCH_PREFIX, REMOTE_PREFIX, TAG_PREFIX,
};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::{debug, info};

/// How a fetch maps remote references locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Name used under `refs/remotes/`.
    pub remote: String,
    /// Copy every remote reference under its own name instead.
    pub mirror: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            mirror: false,
        }
    }
}

/// Result of [`fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing new on the remote.
    AlreadyUpToDate,
    /// Objects were stored and references moved.
    Fetched {
        /// Objects received.
        objects: usize,
        /// Local references that changed, with their new values.
        updated_refs: Vec<(String, ObjectId)>,
    },
}

/// Result of [`push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote already has every reference at the pushed value.
    AlreadyUpToDate,
    /// The remote's per-reference report. Failed commands are reported here,
    /// not as an error.
    Pushed(ReportStatus),
}

/// Fetches from `endpoint` into `storer`.
///
/// Branches land under `refs/remotes/<remote>/`, tags keep their names, and
/// other references are ignored unless mirroring.
pub fn fetch<S: Storer + ?Sized>(
    registry: &Registry,
    endpoint: &Endpoint,
    auth: Option<&AuthMethod>,
    storer: &S,
    options: &FetchOptions,
) -> Result<FetchOutcome> {
    let transport = registry.transport_for(endpoint)?;
    let mut session = transport.new_upload_pack_session(endpoint, auth)?;
    let adv = session.advertised_references()?;

    let mapped = map_references(&adv, options);
    let mut wants = Vec::new();
    for id in mapped.values() {
        if !storer.has_object(id)? && !wants.contains(id) {
            wants.push(*id);
        }
    }

    let mut objects = 0;
    if wants.is_empty() {
        session.close()?;
    } else {
        let mut request = UploadPackRequest::new();
        request.request.wants = wants;
        request.request.capabilities = fetch_capabilities(&adv.capabilities)?;
        request.haves = local_tips(storer)?;
        debug!(
            wants = request.request.wants.len(),
            haves = request.haves.len(),
            "requesting pack"
        );

        let response = session.upload_pack(&request)?;
        session.close()?;
        let summary =
            decode_from_reader(&response.pack[..], storer, registry.config().pack.max_objects)?;
        objects = summary.objects.len();
    }

    let mut updated_refs = Vec::new();
    for (name, id) in mapped {
        let current = storer.reference(&name).ok().and_then(|r| r.as_direct());
        if current != Some(id) {
            storer.set_reference(&name, Reference::Direct(id))?;
            updated_refs.push((name, id));
        }
    }

    if objects == 0 && updated_refs.is_empty() {
        info!(%endpoint, "already up to date");
        return Ok(FetchOutcome::AlreadyUpToDate);
    }
    info!(%endpoint, objects, refs = updated_refs.len(), "fetched");
    Ok(FetchOutcome::Fetched {
        objects,
        updated_refs,
    })
}

/// Pushes `refspecs` from `storer` to `endpoint`.
///
/// Updates that would drop remote commits are refused unless forced. The
/// remote applies the commands one at a time; see the returned report for
/// which succeeded.
pub fn push<S: Storer + ?Sized>(
    registry: &Registry,
    endpoint: &Endpoint,
    auth: Option<&AuthMethod>,
    storer: &S,
    refspecs: &[RefSpec],
) -> Result<PushOutcome> {
    let transport = registry.transport_for(endpoint)?;
    let mut session = transport.new_receive_pack_session(endpoint, auth)?;
    let adv = session.advertised_references()?;

    let mut commands = Vec::new();
    for spec in refspecs {
        let old = adv.references.get(&spec.dst).copied().unwrap_or(ObjectId::ZERO);
        let new = spec.resolve_source(storer)?.unwrap_or(ObjectId::ZERO);
        if old == new {
            continue;
        }
        if !spec.force && !old.is_zero() && !new.is_zero() && !is_ancestor(storer, old, new)? {
            return Err(TransportError::NonFastForward(spec.dst.clone()));
        }
        commands.push(Command::new(spec.dst.clone(), old, new));
    }

    if commands.is_empty() {
        session.close()?;
        info!(%endpoint, "already up to date");
        return Ok(PushOutcome::AlreadyUpToDate);
    }

    let mut request = ReferenceUpdateRequest::new();
    request.capabilities = push_capabilities(&adv.capabilities)?;
    request.commands = commands;
    if request.needs_pack() {
        let wants: Vec<ObjectId> = request
            .commands
            .iter()
            .map(|c| c.new)
            .filter(|id| !id.is_zero())
            .collect();
        let haves: Vec<ObjectId> = adv.references.values().copied().collect();
        let ids = revlist::objects(storer, &wants, &haves)?;
        encode_objects(storer, &ids, &registry.config().pack, &mut request.pack)?;
        debug!(objects = ids.len(), bytes = request.pack.len(), "pack built");
    }

    let report = session.receive_pack(&request)?;
    session.close()?;
    // Without report-status the remote says nothing; assume success.
    let report = report.unwrap_or_else(|| ReportStatus {
        command_statuses: request
            .commands
            .iter()
            .map(|c| CommandStatus::ok(&c.name))
            .collect(),
        ..ReportStatus::new()
    });
    info!(%endpoint, ok = report.is_ok(), commands = request.commands.len(), "pushed");
    Ok(PushOutcome::Pushed(report))
}

fn map_references(adv: &AdvRefs, options: &FetchOptions) -> BTreeMap<String, ObjectId> {
    adv.references
        .iter()
        .filter_map(|(name, id)| {
            let local = if options.mirror {
                name.clone()
            } else if let Some(branch) = name.strip_prefix(BRANCH_PREFIX) {
                format!("{REMOTE_PREFIX}{}/{branch}", options.remote)
            } else if name.starts_with(TAG_PREFIX) {
                name.clone()
            } else {
                return None;
            };
            Some((local, *id))
        })
        .collect()
}

/// Tips of every local reference whose object is present.
fn local_tips<S: Storer + ?Sized>(storer: &S) -> Result<Vec<ObjectId>> {
    let mut tips = Vec::new();
    for (_, reference) in storer.list_references()? {
        if let Some(id) = reference.as_direct() {
            if !tips.contains(&id) && storer.has_object(&id)? {
                tips.push(id);
            }
        }
    }
    Ok(tips)
}

fn agent() -> Vec<String> {
    vec![DEFAULT_AGENT.to_string()]
}

fn fetch_capabilities(server: &CapabilityList) -> Result<CapabilityList> {
    let mut capabilities = CapabilityList::new();
    if server.supports(Capability::OfsDelta) {
        capabilities.add_flag(Capability::OfsDelta)?;
    }
    if server.supports(Capability::Sideband64k) {
        capabilities.add_flag(Capability::Sideband64k)?;
    } else if server.supports(Capability::Sideband) {
        capabilities.add_flag(Capability::Sideband)?;
    }
    if server.supports(Capability::Agent) {
        capabilities.set(Capability::Agent, agent())?;
    }
    Ok(capabilities)
}

fn push_capabilities(server: &CapabilityList) -> Result<CapabilityList> {
    let mut capabilities = CapabilityList::new();
    for capability in [
        Capability::ReportStatus,
        Capability::DeleteRefs,
        Capability::OfsDelta,
    ] {
        if server.supports(capability) {
            capabilities.add_flag(capability)?;
        }
    }
    if server.supports(Capability::Agent) {
        capabilities.set(Capability::Agent, agent())?;
    }
    Ok(capabilities)
}

/// Returns true if `ancestor` is reachable from `descendant` through commit
/// parents. Objects missing locally count as unrelated.
fn is_ancestor<S: Storer + ?Sized>(
    storer: &S,
    ancestor: ObjectId,
    descendant: ObjectId,
) -> Result<bool> {
    let mut queue = VecDeque::from([descendant]);
    let mut seen = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id) || !storer.has_object(&id)? {
            continue;
        }
        let object = storer.object(&id)?;
        if object.object_type != ObjectType::Commit {
            continue;
        }
        queue.extend(Commit::decode(&object)?.parents);
    }
    Ok(false)
}
