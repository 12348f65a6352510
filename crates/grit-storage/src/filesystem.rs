//! On-disk storage using git's directory layout.
//!
//! New objects are written loose under `objects/xx/<38 hex>`; reads fall back
//! to the indexed packs in `objects/pack`. References are loose files under
//! `refs/` (plus `HEAD`), with `packed-refs` as a read-mostly fallback that
//! loose files override.

use crate::compression::CompressionLevel;
use crate::pack::PackFile;
use crate::store::{decode_loose, encode_loose};
use crate::{
    validate_reference_name, GitObject, ObjectId, ObjectStorer, ObjectType, Reference,
    ReferenceStorer, Result, StorageError, BRANCH_PREFIX, HEAD,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const PACKED_REFS: &str = "packed-refs";
const PACKED_REFS_HEADER: &str = "# pack-refs with: peeled fully-peeled sorted \n";

/// A repository stored in a git directory (the `.git` folder or a bare repo).
#[derive(Debug)]
pub struct FilesystemStorage {
    root: PathBuf,
    compression: CompressionLevel,
    /// Serializes rewrites of `packed-refs`.
    packed_refs_lock: Mutex<()>,
    /// Loaded packs keyed by index path; `None` until first scanned.
    packs: RwLock<Option<BTreeMap<PathBuf, Arc<PackFile>>>>,
}

impl FilesystemStorage {
    /// Creates a new bare repository at `path`, with HEAD pointing at `master`.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if root.join(HEAD).exists() {
            return Err(StorageError::RepositoryExists(root));
        }

        for dir in ["objects/info", "objects/pack", "refs/heads", "refs/tags"] {
            fs::create_dir_all(root.join(dir))?;
        }
        fs::write(
            root.join(HEAD),
            format!("{}\n", Reference::Symbolic(format!("{BRANCH_PREFIX}master"))),
        )?;

        debug!(path = %root.display(), "initialized repository");
        Self::open(root)
    }

    /// Opens an existing repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.join(HEAD).is_file() || !root.join("objects").is_dir() {
            return Err(StorageError::RepositoryNotFound(root));
        }
        Ok(Self {
            root,
            compression: CompressionLevel::default(),
            packed_refs_lock: Mutex::new(()),
            packs: RwLock::new(None),
        })
    }

    /// Sets the compression level used for new loose objects.
    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Returns the repository directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    /// Rescans `objects/pack`, loading new packs and forgetting removed
    /// ones. Returns true if the set changed.
    fn refresh_packs(&self) -> Result<bool> {
        let dir = self.root.join("objects").join("pack");
        let mut found = BTreeSet::new();
        match fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    // A pack still being written has no index yet.
                    if path.extension().is_some_and(|ext| ext == "idx")
                        && path.with_extension("pack").is_file()
                    {
                        found.insert(path);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut packs = self.packs.write();
        let loaded = packs.get_or_insert_with(BTreeMap::new);
        let before = loaded.len();
        loaded.retain(|path, _| found.contains(path));
        let mut changed = loaded.len() != before;
        for path in found {
            if loaded.contains_key(&path) {
                continue;
            }
            let pack = PackFile::open(&path.with_extension("pack"), &path)?;
            debug!(path = %path.display(), objects = pack.index().len(), "loaded pack");
            loaded.insert(path, Arc::new(pack));
            changed = true;
        }
        Ok(changed)
    }

    fn loaded_packs(&self) -> Result<Vec<Arc<PackFile>>> {
        if self.packs.read().is_none() {
            self.refresh_packs()?;
        }
        Ok(self
            .packs
            .read()
            .as_ref()
            .map(|packs| packs.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Finds `id` in the packs, rescanning once on a miss when `rescan` is set.
    fn packed_object(&self, id: &ObjectId, rescan: bool) -> Result<Option<GitObject>> {
        for pack in self.loaded_packs()? {
            if let Some(object) = pack.object(id)? {
                return Ok(Some(object));
            }
        }
        if rescan && self.refresh_packs()? {
            return self.packed_object(id, false);
        }
        Ok(None)
    }

    fn in_packs(&self, id: &ObjectId, rescan: bool) -> Result<bool> {
        if self.loaded_packs()?.iter().any(|pack| pack.contains(id)) {
            return Ok(true);
        }
        if rescan && self.refresh_packs()? {
            return self.in_packs(id, false);
        }
        Ok(false)
    }

    /// Writes `contents` to `path` through a temporary file in the same
    /// directory, so readers never observe a partial file.
    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StorageError::Corruption(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    fn read_packed_refs(&self) -> Result<BTreeMap<String, Reference>> {
        let content = match fs::read_to_string(self.root.join(PACKED_REFS)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut refs = BTreeMap::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                continue;
            }
            let (hex, name) = line.split_once(' ').ok_or_else(|| {
                StorageError::Corruption(format!("malformed packed-refs line: {line}"))
            })?;
            refs.insert(name.to_string(), Reference::Direct(ObjectId::from_hex(hex)?));
        }
        Ok(refs)
    }

    fn remove_packed_ref(&self, name: &str) -> Result<()> {
        let _guard = self.packed_refs_lock.lock();
        let path = self.root.join(PACKED_REFS);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut kept = String::new();
        let mut removed = false;
        let mut skipping = false;
        for line in content.lines() {
            if line.starts_with('^') {
                if !skipping {
                    kept.push_str(line);
                    kept.push('\n');
                }
                continue;
            }
            skipping = line.split_once(' ').map(|(_, n)| n) == Some(name);
            removed |= skipping;
            if !skipping {
                kept.push_str(line);
                kept.push('\n');
            }
        }

        if removed {
            if kept.is_empty() {
                kept.push_str(PACKED_REFS_HEADER);
            }
            self.write_atomic(&path, kept.as_bytes())?;
        }
        Ok(())
    }

    fn walk_loose_refs(&self, dir: &Path, prefix: &str, out: &mut BTreeMap<String, Reference>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let name = format!("{prefix}/{file_name}");
            if entry.file_type()?.is_dir() {
                self.walk_loose_refs(&entry.path(), &name, out)?;
            } else if !file_name.ends_with(".lock") {
                let content = fs::read_to_string(entry.path())?;
                out.insert(name, Reference::parse(&content)?);
            }
        }
        Ok(())
    }
}

impl ObjectStorer for FilesystemStorage {
    fn set_object(&self, object: GitObject) -> Result<ObjectId> {
        let id = object.id;
        let path = self.object_path(&id);
        if path.exists() || self.in_packs(&id, false)? {
            return Ok(id);
        }
        let compressed = encode_loose(&object, self.compression)?;
        self.write_atomic(&path, &compressed)?;
        debug!(%id, kind = %object.object_type, size = object.size(), "wrote loose object");
        Ok(id)
    }

    fn object(&self, id: &ObjectId) -> Result<GitObject> {
        let compressed = match fs::read(self.object_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return self
                    .packed_object(id, true)?
                    .ok_or(StorageError::ObjectNotFound(*id));
            }
            Err(e) => return Err(e.into()),
        };
        let object = decode_loose(&compressed)?;
        if object.id != *id {
            return Err(StorageError::Corruption(format!(
                "object {} hashes to {}",
                id, object.id
            )));
        }
        Ok(object)
    }

    fn has_object(&self, id: &ObjectId) -> Result<bool> {
        if self.object_path(id).is_file() {
            return Ok(true);
        }
        self.in_packs(id, true)
    }

    fn list_objects(&self, object_type: Option<ObjectType>) -> Result<Vec<ObjectId>> {
        self.refresh_packs()?;
        let mut all = BTreeSet::new();
        for pack in self.loaded_packs()? {
            all.extend(pack.index().ids().iter().copied());
        }
        for fanout in fs::read_dir(self.root.join("objects"))? {
            let fanout = fanout?;
            let prefix = fanout.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !fanout.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(fanout.path())? {
                let rest = entry?.file_name().to_string_lossy().into_owned();
                if let Ok(id) = ObjectId::from_hex(&format!("{prefix}{rest}")) {
                    all.insert(id);
                }
            }
        }

        let mut ids = Vec::with_capacity(all.len());
        for id in all {
            match object_type {
                Some(kind) if self.object(&id)?.object_type != kind => {}
                _ => ids.push(id),
            }
        }
        Ok(ids)
    }
}

impl ReferenceStorer for FilesystemStorage {
    fn set_reference(&self, name: &str, reference: Reference) -> Result<()> {
        validate_reference_name(name)?;
        self.write_atomic(&self.root.join(name), format!("{reference}\n").as_bytes())?;
        debug!(name, target = %reference, "updated reference");
        Ok(())
    }

    fn reference(&self, name: &str) -> Result<Reference> {
        validate_reference_name(name)?;
        match fs::read_to_string(self.root.join(name)) {
            Ok(content) => return Reference::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // A directory such as refs/heads when asking for a prefix.
            Err(e) if self.root.join(name).is_dir() => {
                debug!(name, error = %e, "reference path is a directory");
            }
            Err(e) => return Err(e.into()),
        }
        self.read_packed_refs()?
            .remove(name)
            .ok_or_else(|| StorageError::ReferenceNotFound(name.to_string()))
    }

    fn remove_reference(&self, name: &str) -> Result<()> {
        validate_reference_name(name)?;
        match fs::remove_file(self.root.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.remove_packed_ref(name)?;
        debug!(name, "removed reference");
        Ok(())
    }

    fn list_references(&self) -> Result<Vec<(String, Reference)>> {
        let mut refs = self.read_packed_refs()?;
        self.walk_loose_refs(&self.root.join("refs"), "refs", &mut refs)?;
        if let Ok(head) = fs::read_to_string(self.root.join(HEAD)) {
            refs.insert(HEAD.to_string(), Reference::parse(&head)?);
        }
        Ok(refs.into_iter().collect())
    }
}
