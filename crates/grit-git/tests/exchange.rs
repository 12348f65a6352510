//! Client and server halves of the protocol talking through byte buffers,
//! with a filesystem repository on the server side.

use grit_git::{
    serve_receive_pack, serve_upload_pack, AdvRefs, Capability, Command, PackConfig,
    PktLineReader, ReferenceUpdateRequest, ReportStatus, ServeOptions, SidebandKind,
    UploadPackRequest, UploadPackResponse, UploadRequest,
};
use grit_storage::{
    resolve_reference, Commit, FileMode, FilesystemStorage, GitObject, MemoryStorage, ObjectId,
    ObjectStorer, Reference, ReferenceStorer, Signature, Time, Tree, TreeEntry,
};
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

fn signature() -> Signature {
    Signature::new("Bob", "bob@example.com", Time::new(1_700_000_000, -300))
}

fn commit_file<S: ObjectStorer>(storer: &S, content: Vec<u8>, parents: &[ObjectId]) -> ObjectId {
    let blob = storer.set_object(GitObject::blob(content)).unwrap();
    let tree = storer
        .set_object(Tree::new(vec![TreeEntry::new("data.txt", FileMode::REGULAR, blob)]).encode())
        .unwrap();
    let commit = Commit {
        tree,
        parents: parents.to_vec(),
        author: signature(),
        committer: signature(),
        extra_headers: Vec::new(),
        message: format!("commit {}\n", parents.len()),
    };
    storer.set_object(commit.encode()).unwrap()
}

fn lines(n: usize, tag: &str) -> Vec<u8> {
    (0..n)
        .map(|i| format!("line {i} {tag}\n"))
        .collect::<String>()
        .into_bytes()
}

fn server() -> (TempDir, Arc<FilesystemStorage>, ObjectId, ObjectId) {
    let dir = TempDir::new().unwrap();
    let storage = FilesystemStorage::init(dir.path().join("repo.git")).unwrap();
    let c1 = commit_file(&storage, lines(200, "a"), &[]);
    let c2 = commit_file(&storage, lines(210, "a"), &[c1]);
    storage
        .set_reference("refs/heads/master", Reference::Direct(c2))
        .unwrap();
    (dir, Arc::new(storage), c1, c2)
}

fn advertisement(storage: Arc<FilesystemStorage>, receive: bool) -> AdvRefs {
    let options = ServeOptions {
        stateless_rpc: true,
        advertise_refs: true,
    };
    let mut out = Vec::new();
    if receive {
        serve_receive_pack(storage, &PackConfig::default(), options, &b""[..], &mut out).unwrap();
    } else {
        serve_upload_pack(storage, &PackConfig::default(), options, &b""[..], &mut out).unwrap();
    }
    AdvRefs::decode(&mut PktLineReader::new(Cursor::new(out))).unwrap()
}

#[test]
fn clone_then_incremental_fetch() {
    let (_dir, storage, c1, c2) = server();
    let adv = advertisement(storage.clone(), false);
    assert_eq!(adv.head, Some(c2));
    assert!(adv.capabilities.supports(Capability::OfsDelta));

    let client = MemoryStorage::new();
    let mut request = UploadPackRequest::new();
    request.request = UploadRequest {
        wants: vec![c1],
        ..UploadRequest::new()
    };
    request
        .request
        .capabilities
        .add_flag(Capability::Sideband)
        .unwrap();
    request.request.capabilities.add_flag(Capability::OfsDelta).unwrap();

    let fetch = |request: &UploadPackRequest, sideband: Option<SidebandKind>| {
        let mut body = Vec::new();
        request.encode(&mut body).unwrap();
        let options = ServeOptions {
            stateless_rpc: true,
            advertise_refs: false,
        };
        let mut out = Vec::new();
        serve_upload_pack(storage.clone(), &PackConfig::default(), options, &body[..], &mut out)
            .unwrap();
        UploadPackResponse::decode(Cursor::new(out), sideband, None).unwrap()
    };

    let response = fetch(&request, Some(SidebandKind::Sideband));
    let summary =
        grit_git::decode_from_reader(&response.pack[..], &client, 1000).unwrap();
    assert_eq!(summary.objects.len(), 3);

    request.request.wants = vec![c2];
    request.request.capabilities = Default::default();
    request.haves = vec![c1];
    let response = fetch(&request, None);
    let summary =
        grit_git::decode_from_reader(&response.pack[..], &client, 1000).unwrap();
    assert_eq!(summary.objects.len(), 3);
    assert_eq!(client.list_objects(None).unwrap().len(), 6);
    assert!(client.has_object(&c2).unwrap());
}

#[test]
fn push_creates_and_updates_branches() {
    let (_dir, storage, c1, c2) = server();
    let adv = advertisement(storage.clone(), true);
    assert_eq!(adv.references.get("refs/heads/master"), Some(&c2));

    let client = MemoryStorage::new();
    assert_eq!(commit_file(&client, lines(200, "a"), &[]), c1);
    assert_eq!(commit_file(&client, lines(210, "a"), &[c1]), c2);
    let c3 = commit_file(&client, lines(220, "a"), &[c2]);
    let ids = grit_git::revlist::objects(&client, &[c3], &[c2]).unwrap();
    let mut pack = Vec::new();
    grit_git::encode_objects(&client, &ids, &PackConfig::default(), &mut pack).unwrap();

    let mut request = ReferenceUpdateRequest::new();
    request
        .capabilities
        .add_flag(Capability::ReportStatus)
        .unwrap();
    request.commands = vec![
        Command::new("refs/heads/master", c2, c3),
        Command::new("refs/heads/stale", c1, c3),
        Command::new("refs/tags/base", ObjectId::ZERO, c1),
    ];
    request.pack = pack;
    let mut body = Vec::new();
    request.encode(&mut body).unwrap();

    let options = ServeOptions {
        stateless_rpc: true,
        advertise_refs: false,
    };
    let mut out = Vec::new();
    serve_receive_pack(storage.clone(), &PackConfig::default(), options, &body[..], &mut out)
        .unwrap();
    let report = ReportStatus::decode(&mut PktLineReader::new(Cursor::new(out))).unwrap();

    assert_eq!(report.unpack_status, "ok");
    assert!(report.command_statuses[0].is_ok());
    assert_eq!(report.command_statuses[1].status, "reference did not exist");
    assert!(report.command_statuses[2].is_ok());
    assert_eq!(resolve_reference(&*storage, "refs/heads/master").unwrap(), c3);
    assert_eq!(resolve_reference(&*storage, "refs/tags/base").unwrap(), c1);

    let reopened = FilesystemStorage::open(storage.path()).unwrap();
    assert!(reopened.has_object(&c3).unwrap());
}
