use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::type_manager::{is_addressable, remove_snapshot_files};
use super::{FsTypeManager, SNAPSHOT_DATA_EXT};
use crate::conduit;
use crate::copy::stream_copy;
use crate::data_transport::{COMBINED_EXT, DATA_EXT, METADATA_EXT};
use crate::{
    Context, CustodianError, EntityStream, ProtectedEntity, ProtectedEntityId,
    ProtectedEntityInfo, ProtectedEntitySnapshotId, Result, UNKNOWN_SIZE,
};

/// What kind of filesystem entry an entity is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsEntryKind {
    File,
    Directory,
}

/// Metadata stream payload of a filesystem entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsMetadata {
    pub name: String,
    pub kind: FsEntryKind,
    /// Length in bytes, files only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Set on snapshot metadata only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_time: Option<DateTime<Utc>>,
}

impl FsMetadata {
    pub fn from_path(name: &str, path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let kind = if meta.is_dir() {
            FsEntryKind::Directory
        } else {
            FsEntryKind::File
        };
        Ok(Self {
            name: name.to_string(),
            kind,
            size: (kind == FsEntryKind::File).then(|| meta.len()),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            snapshot_time: None,
        })
    }
}

/// One entry under the fs root, or one snapshot of it
pub struct FsProtectedEntity<'a> {
    tm: &'a FsTypeManager,
    id: ProtectedEntityId,
    path: PathBuf,
}

impl<'a> FsProtectedEntity<'a> {
    pub(crate) fn new(tm: &'a FsTypeManager, id: ProtectedEntityId, path: PathBuf) -> Self {
        Self { tm, id, path }
    }

    fn name(&self) -> &str {
        self.id.id()
    }

    fn require_base(&self, operation: &str) -> Result<()> {
        if self.id.has_snapshot() {
            return Err(CustodianError::invalid_operation(format!(
                "{operation} is not valid on snapshot {}",
                self.id
            )));
        }
        Ok(())
    }

    fn map_missing(&self, id: &ProtectedEntityId, error: io::Error) -> CustodianError {
        if error.kind() == io::ErrorKind::NotFound {
            CustodianError::not_found(id)
        } else {
            error.into()
        }
    }

    fn build_info(&self, id: &ProtectedEntityId, name: String, size: i64) -> Result<ProtectedEntityInfo> {
        let transports = self.tm.transports();
        Ok(ProtectedEntityInfo::new(
            id.clone(),
            name,
            size,
            transports.transports(id, DATA_EXT)?,
            transports.transports(id, METADATA_EXT)?,
            transports.transports(id, COMBINED_EXT)?,
            Vec::new(),
        ))
    }

    fn base_info(&self) -> Result<ProtectedEntityInfo> {
        let base_id = self.id.base_id();
        let md = FsMetadata::from_path(self.name(), &self.path)
            .map_err(|e| self.map_missing(&base_id, e))?;
        let size = md.size.map(|s| s as i64).unwrap_or(UNKNOWN_SIZE);
        self.build_info(&base_id, md.name, size)
    }

    fn snapshot_info(&self, snapshot_id: &ProtectedEntitySnapshotId) -> Result<ProtectedEntityInfo> {
        let snap_pe_id = self.id.base_id().with_snapshot(snapshot_id.clone())?;
        if !is_addressable(snapshot_id.as_str()) {
            return Err(CustodianError::not_found(&snap_pe_id));
        }
        let (data_path, md_path) = self.tm.snapshot_files(self.name(), snapshot_id);

        let bytes = fs::read(&md_path).map_err(|e| self.map_missing(&snap_pe_id, e))?;
        let md: FsMetadata = serde_json::from_slice(&bytes)?;
        let size = match md.kind {
            FsEntryKind::File => fs::metadata(&data_path)
                .map_err(|e| self.map_missing(&snap_pe_id, e))?
                .len() as i64,
            FsEntryKind::Directory => UNKNOWN_SIZE,
        };
        self.build_info(&snap_pe_id, md.name, size)
    }
}

impl ProtectedEntity for FsProtectedEntity<'_> {
    fn id(&self) -> &ProtectedEntityId {
        &self.id
    }

    fn info(&self, ctx: &Context) -> Result<ProtectedEntityInfo> {
        ctx.check()?;
        match self.id.snapshot_id() {
            Some(snapshot_id) => self.snapshot_info(snapshot_id),
            None => self.base_info(),
        }
    }

    fn combined_info(&self, ctx: &Context) -> Result<Vec<ProtectedEntityInfo>> {
        let mut infos = vec![self.info(ctx)?];
        if !self.id.has_snapshot() {
            for snapshot_id in self.list_snapshots(ctx)? {
                infos.push(self.snapshot_info(&snapshot_id)?);
            }
        }
        Ok(infos)
    }

    fn snapshot(&self, ctx: &Context) -> Result<ProtectedEntitySnapshotId> {
        ctx.check()?;
        self.require_base("snapshot")?;
        let _guard = self.tm.snapshot_lock().lock();

        let snapshot_id = ProtectedEntitySnapshotId::new(Uuid::new_v4().to_string());
        fs::create_dir_all(self.tm.snapshot_dir_for(self.name()))?;
        let (data_path, md_path) = self.tm.snapshot_files(self.name(), &snapshot_id);

        let result = (|| -> Result<()> {
            let mut md = FsMetadata::from_path(self.name(), &self.path)
                .map_err(|e| self.map_missing(&self.id, e))?;
            md.snapshot_time = Some(Utc::now());

            let mut file = File::create(&data_path)?;
            if let Some(mut reader) = self.data_reader(ctx)? {
                let bytes = stream_copy(ctx, &mut reader, &mut file)?;
                debug!(id = %self.id, snapshot = %snapshot_id, bytes, "Materialized snapshot data");
            }
            file.sync_all()?;
            fs::write(&md_path, serde_json::to_vec_pretty(&md)?)?;
            Ok(())
        })();

        if let Err(e) = result {
            for path in [&data_path, &md_path] {
                if let Err(cleanup) = fs::remove_file(path) {
                    if cleanup.kind() != io::ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %cleanup, "Failed to remove partial snapshot");
                    }
                }
            }
            return Err(e);
        }

        info!(id = %self.id, snapshot = %snapshot_id, "Created snapshot");
        Ok(snapshot_id)
    }

    fn list_snapshots(&self, ctx: &Context) -> Result<Vec<ProtectedEntitySnapshotId>> {
        ctx.check()?;
        self.require_base("list snapshots")?;
        let dir = self.tm.snapshot_dir_for(self.name());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let file_name = entry?.file_name().to_string_lossy().to_string();
            if let Some(snapshot) = file_name.strip_suffix(SNAPSHOT_DATA_EXT) {
                names.push(snapshot.to_string());
            }
        }
        names.sort();
        Ok(names.into_iter().map(ProtectedEntitySnapshotId::new).collect())
    }

    fn delete_snapshot(&self, ctx: &Context, snapshot_id: &ProtectedEntitySnapshotId) -> Result<bool> {
        ctx.check()?;
        self.require_base("delete snapshot")?;
        let _guard = self.tm.snapshot_lock().lock();
        let deleted = remove_snapshot_files(self.tm, self.name(), snapshot_id)?;
        if deleted {
            info!(id = %self.id, snapshot = %snapshot_id, "Deleted snapshot");
        } else {
            debug!(id = %self.id, snapshot = %snapshot_id, "Snapshot to delete does not exist");
        }
        Ok(deleted)
    }

    fn info_for_snapshot(
        &self,
        ctx: &Context,
        snapshot_id: &ProtectedEntitySnapshotId,
    ) -> Result<ProtectedEntityInfo> {
        ctx.check()?;
        self.snapshot_info(snapshot_id)
    }

    fn components<'b>(&'b self, ctx: &Context) -> Result<Vec<Box<dyn ProtectedEntity + 'b>>> {
        ctx.check()?;
        Ok(Vec::new())
    }

    fn data_reader(&self, ctx: &Context) -> Result<Option<EntityStream>> {
        ctx.check()?;
        if let Some(snapshot_id) = self.id.snapshot_id() {
            let (data_path, _) = self.tm.snapshot_files(self.name(), snapshot_id);
            let file = File::open(&data_path).map_err(|e| self.map_missing(&self.id, e))?;
            return Ok(Some(Box::new(file) as EntityStream));
        }

        let meta = fs::metadata(&self.path).map_err(|e| self.map_missing(&self.id, e))?;
        if meta.is_dir() {
            return directory_stream(ctx, &self.id, self.path.clone()).map(Some);
        }
        let file = File::open(&self.path).map_err(|e| self.map_missing(&self.id, e))?;
        Ok(Some(Box::new(file) as EntityStream))
    }

    fn metadata_reader(&self, ctx: &Context) -> Result<Option<EntityStream>> {
        ctx.check()?;
        if let Some(snapshot_id) = self.id.snapshot_id() {
            let (_, md_path) = self.tm.snapshot_files(self.name(), snapshot_id);
            let file = File::open(&md_path).map_err(|e| self.map_missing(&self.id, e))?;
            return Ok(Some(Box::new(file) as EntityStream));
        }

        let md = FsMetadata::from_path(self.name(), &self.path)
            .map_err(|e| self.map_missing(&self.id, e))?;
        let bytes = serde_json::to_vec_pretty(&md)?;
        Ok(Some(Box::new(Cursor::new(bytes)) as EntityStream))
    }
}

/// Stream a tar archive of `path`, built on a background thread.
///
/// The producer stops as soon as the returned reader is dropped or `ctx` is
/// cancelled.
fn directory_stream(ctx: &Context, id: &ProtectedEntityId, path: PathBuf) -> Result<EntityStream> {
    let (mut writer, reader) = conduit::pipe(conduit::DEFAULT_CAPACITY, ctx);
    let id = id.clone();

    thread::Builder::new()
        .name("fs-tar".to_string())
        .spawn(move || {
            match write_tar(&mut writer, &path) {
                Ok(()) => writer.close(),
                Err(e) => {
                    let error = CustodianError::from_stream_io(e);
                    debug!(id = %id, error = %error, "Directory stream stopped");
                    writer.fail(error);
                }
            }
        })?;

    Ok(Box::new(reader) as EntityStream)
}

/// Write `path` as a tar archive into `dest`. The end-of-archive trailer is
/// only written once every entry made it in.
fn write_tar<W: Write>(dest: W, path: &Path) -> io::Result<()> {
    let mut builder = tar::Builder::new(dest);
    builder.follow_symlinks(false);
    match builder.append_dir_all(".", path) {
        Ok(()) => builder.into_inner().map(|_| ()),
        Err(e) => {
            // Dropping the builder would finish the archive.
            std::mem::forget(builder);
            Err(e)
        }
    }
}
