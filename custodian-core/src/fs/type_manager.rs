use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entity::{FsEntryKind, FsMetadata, FsProtectedEntity};
use super::{TransportSource, SNAPSHOT_DATA_EXT, SNAPSHOT_MD_EXT, TYPE_NAME};
use crate::config::FsConfig;
use crate::copy::stream_copy;
use crate::{
    Context, CopyCreateOptions, CustodianError, ProtectedEntity, ProtectedEntityId,
    ProtectedEntityInfo, ProtectedEntitySnapshotId, ProtectedEntityTypeManager, Result,
};

/// Type manager for entries of one directory
#[derive(Debug)]
pub struct FsTypeManager {
    root: PathBuf,
    snapshots_dir: PathBuf,
    transports: TransportSource,
    /// Serializes snapshot creation and removal
    snapshot_lock: Mutex<()>,
}

impl FsTypeManager {
    /// Create a type manager rooted at `config.root`
    ///
    /// # Errors
    /// `Config` if the root is not an existing directory
    pub fn new(config: FsConfig, transports: TransportSource) -> Result<Self> {
        if !config.root.is_dir() {
            return Err(CustodianError::config(format!(
                "fs root {} is not a directory",
                config.root.display()
            )));
        }
        let snapshots_dir = config.snapshots_dir();
        info!(
            root = %config.root.display(),
            snapshots_dir = %snapshots_dir.display(),
            "Initialized fs type manager"
        );
        Ok(Self {
            root: config.root,
            snapshots_dir,
            transports,
            snapshot_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn transports(&self) -> &TransportSource {
        &self.transports
    }

    pub(crate) fn snapshot_lock(&self) -> &Mutex<()> {
        &self.snapshot_lock
    }

    pub(crate) fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub(crate) fn snapshot_dir_for(&self, name: &str) -> PathBuf {
        self.snapshots_dir.join(name)
    }

    pub(crate) fn snapshot_files(
        &self,
        name: &str,
        snapshot_id: &ProtectedEntitySnapshotId,
    ) -> (PathBuf, PathBuf) {
        let dir = self.snapshot_dir_for(name);
        (
            dir.join(format!("{snapshot_id}{SNAPSHOT_DATA_EXT}")),
            dir.join(format!("{snapshot_id}{SNAPSHOT_MD_EXT}")),
        )
    }

    fn check_type(&self, id: &ProtectedEntityId) -> Result<()> {
        if id.pe_type() != TYPE_NAME {
            return Err(CustodianError::invalid_operation(format!(
                "{id} is not handled by the {TYPE_NAME} type manager"
            )));
        }
        Ok(())
    }

    /// Create a new entry from `data`. Directory data is a tar stream and is
    /// unpacked; anything else is written verbatim as a file.
    fn materialize(
        &self,
        ctx: &Context,
        name: &str,
        kind: FsEntryKind,
        data: Option<crate::EntityStream>,
    ) -> Result<()> {
        let dest = self.entry_path(name);
        let result = match (kind, data) {
            (FsEntryKind::Directory, Some(reader)) => {
                debug!(path = %dest.display(), "Unpacking directory stream");
                unpack_tar(ctx, reader, &dest)
            }
            (FsEntryKind::Directory, None) => fs::create_dir(&dest).map_err(CustodianError::from),
            (FsEntryKind::File, Some(reader)) => write_file(ctx, reader, &dest),
            (FsEntryKind::File, None) => File::create(&dest).map(|_| ()).map_err(CustodianError::from),
        };

        if let Err(e) = result {
            if let Err(cleanup) = remove_entry(&dest) {
                warn!(path = %dest.display(), error = %cleanup, "Failed to remove partial copy");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl ProtectedEntityTypeManager for FsTypeManager {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn get_protected_entity<'a>(
        &'a self,
        ctx: &Context,
        id: &ProtectedEntityId,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        ctx.check()?;
        self.check_type(id)?;
        let name = id.id();
        if !is_addressable(name) {
            return Err(CustodianError::not_found(id));
        }

        let path = self.entry_path(name);
        if !path.exists() {
            return Err(CustodianError::not_found(id));
        }
        if let Some(snapshot_id) = id.snapshot_id() {
            let (data_path, _) = self.snapshot_files(name, snapshot_id);
            if !is_addressable(snapshot_id.as_str()) || !data_path.is_file() {
                return Err(CustodianError::not_found(id));
            }
        }

        Ok(Box::new(FsProtectedEntity::new(self, id.clone(), path)))
    }

    fn get_protected_entities(&self, ctx: &Context) -> Result<Vec<ProtectedEntityId>> {
        ctx.check()?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if !is_addressable(&name) {
                warn!(name = %name, "Skipping entry whose name cannot be used as an id");
                continue;
            }
            names.push(name);
        }
        names.sort();

        names
            .into_iter()
            .map(|name| ProtectedEntityId::new(TYPE_NAME, name))
            .collect()
    }

    fn copy<'a>(
        &'a self,
        ctx: &Context,
        source: &dyn ProtectedEntity,
        options: CopyCreateOptions,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        ctx.check()?;
        if options != CopyCreateOptions::AllocateNewObject {
            return Err(CustodianError::unsupported(format!(
                "{TYPE_NAME} type manager does not support {options}"
            )));
        }

        let kind = source_kind(ctx, source)?;
        let name = Uuid::new_v4().to_string();
        let data = source.data_reader(ctx)?;
        self.materialize(ctx, &name, kind, data)?;

        let new_id = ProtectedEntityId::new(TYPE_NAME, name)?;
        info!(source = %source.id(), id = %new_id, "Copied protected entity");
        self.get_protected_entity(ctx, &new_id)
    }

    fn copy_from_info<'a>(
        &'a self,
        ctx: &Context,
        info: &ProtectedEntityInfo,
        options: CopyCreateOptions,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        if options != CopyCreateOptions::AllocateNewObject {
            return Err(CustodianError::unsupported(format!(
                "{TYPE_NAME} type manager does not support {options}"
            )));
        }
        if info.id().pe_type() != TYPE_NAME {
            return Err(CustodianError::unsupported(format!(
                "{TYPE_NAME} type manager cannot fetch {} from its transports",
                info.id()
            )));
        }
        let source = self.get_protected_entity(ctx, info.id())?;
        self.copy(ctx, source.as_ref(), options)
    }

    fn delete(&self, ctx: &Context, id: &ProtectedEntityId) -> Result<()> {
        ctx.check()?;
        self.check_type(id)?;
        let name = id.id();
        if !is_addressable(name) {
            return Err(CustodianError::not_found(id));
        }

        if let Some(snapshot_id) = id.snapshot_id() {
            let _guard = self.snapshot_lock.lock();
            if !remove_snapshot_files(self, name, snapshot_id)? {
                return Err(CustodianError::not_found(id));
            }
            info!(id = %id, "Deleted snapshot");
            return Ok(());
        }

        let path = self.entry_path(name);
        if !path.exists() {
            return Err(CustodianError::not_found(id));
        }
        remove_entry(&path)?;

        let _guard = self.snapshot_lock.lock();
        let snapshot_dir = self.snapshot_dir_for(name);
        if snapshot_dir.exists() {
            fs::remove_dir_all(&snapshot_dir)?;
        }
        info!(id = %id, "Deleted protected entity and its snapshots");
        Ok(())
    }
}

/// Remove both files of one snapshot, returning whether it existed.
pub(crate) fn remove_snapshot_files(
    tm: &FsTypeManager,
    name: &str,
    snapshot_id: &ProtectedEntitySnapshotId,
) -> Result<bool> {
    if !is_addressable(snapshot_id.as_str()) {
        return Ok(false);
    }
    let (data_path, md_path) = tm.snapshot_files(name, snapshot_id);
    let mut existed = false;
    for path in [data_path, md_path] {
        match fs::remove_file(&path) {
            Ok(()) => existed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(existed)
}

/// Names usable both as an id segment and as a single visible path
/// component.
pub(crate) fn is_addressable(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(':')
        && !name.contains('/')
        && !name.contains('\\')
}

/// Entry kind recorded in the source's metadata stream. Sources without
/// `fs` metadata are copied as files.
fn source_kind(ctx: &Context, source: &dyn ProtectedEntity) -> Result<FsEntryKind> {
    let Some(mut reader) = source.metadata_reader(ctx)? else {
        return Ok(FsEntryKind::File);
    };
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(CustodianError::from_stream_io)?;
    Ok(serde_json::from_slice::<FsMetadata>(&bytes)
        .map(|md| md.kind)
        .unwrap_or(FsEntryKind::File))
}

fn unpack_tar<R: Read>(ctx: &Context, reader: R, dest: &Path) -> Result<()> {
    fs::create_dir(dest)?;
    let mut archive = tar::Archive::new(CancellableReader { ctx, inner: reader });
    archive
        .unpack(dest)
        .map_err(CustodianError::from_stream_io)?;
    ctx.check()
}

fn write_file<R: Read>(ctx: &Context, mut reader: R, dest: &Path) -> Result<()> {
    let mut file = File::create(dest)?;
    stream_copy(ctx, &mut reader, &mut file)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Fails reads once the context is cancelled.
struct CancellableReader<'c, R> {
    ctx: &'c Context,
    inner: R,
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.ctx.is_cancelled() {
            return Err(CustodianError::Cancelled.into_stream_io());
        }
        self.inner.read(buf)
    }
}
