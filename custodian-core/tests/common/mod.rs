//! In-memory backend shared by the integration tests.
//!
//! Entities of type `mem` form a tree described up front; streams can be
//! configured to fail or to cancel their context part way through.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};

use custodian_core::{
    Context, CopyCreateOptions, CustodianError, EntityStream, ProtectedEntity, ProtectedEntityId,
    ProtectedEntityInfo, ProtectedEntityManager, ProtectedEntitySnapshotId,
    ProtectedEntityTypeManager, Result, UNKNOWN_SIZE,
};
use rand::{Rng, SeedableRng};
use zip::ZipArchive;

pub const MEM_TYPE: &str = "mem";

pub fn mem_id(name: &str) -> ProtectedEntityId {
    ProtectedEntityId::new(MEM_TYPE, name).unwrap()
}

/// Deterministic pseudo-random payload
pub fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

#[derive(Clone)]
pub enum DataSource {
    Bytes(Vec<u8>),
    /// Yields `prefix`, then fails with a backend error carrying `message`
    Failing { prefix: Vec<u8>, message: String },
    /// Yields `prefix` in one read, cancelling `ctx` as it does so
    Cancelling { prefix: Vec<u8>, ctx: Context },
}

#[derive(Clone, Default)]
pub struct Node {
    pub data: Option<DataSource>,
    pub metadata: Option<Vec<u8>>,
    pub children: Vec<String>,
}

impl Node {
    pub fn with_data(data: &[u8]) -> Self {
        Self {
            data: Some(DataSource::Bytes(data.to_vec())),
            ..Self::default()
        }
    }

    pub fn metadata(mut self, metadata: &[u8]) -> Self {
        self.metadata = Some(metadata.to_vec());
        self
    }

    pub fn children(mut self, children: &[&str]) -> Self {
        self.children = children.iter().map(|c| c.to_string()).collect();
        self
    }
}

pub struct MemoryTypeManager {
    type_name: String,
    nodes: BTreeMap<String, Node>,
}

impl Default for MemoryTypeManager {
    fn default() -> Self {
        Self::named(MEM_TYPE)
    }
}

impl MemoryTypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same backend registered under another type tag
    pub fn named(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn node(mut self, name: &str, node: Node) -> Self {
        self.nodes.insert(name.to_string(), node);
        self
    }

    pub fn into_manager(self) -> ProtectedEntityManager {
        ProtectedEntityManager::builder()
            .register(Box::new(self))
            .unwrap()
            .build()
    }
}

impl ProtectedEntityTypeManager for MemoryTypeManager {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_protected_entity<'a>(
        &'a self,
        _ctx: &Context,
        id: &ProtectedEntityId,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        let node = self
            .nodes
            .get(id.id())
            .ok_or_else(|| CustodianError::not_found(id))?;
        Ok(Box::new(MemoryEntity {
            tm: self,
            id: id.clone(),
            node,
        }))
    }

    fn get_protected_entities(&self, _ctx: &Context) -> Result<Vec<ProtectedEntityId>> {
        self.nodes
            .keys()
            .map(|name| ProtectedEntityId::new(&self.type_name, name))
            .collect()
    }

    fn copy<'a>(
        &'a self,
        _ctx: &Context,
        _source: &dyn ProtectedEntity,
        options: CopyCreateOptions,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        Err(CustodianError::unsupported(format!("mem backend is read-only ({options})")))
    }

    fn copy_from_info<'a>(
        &'a self,
        _ctx: &Context,
        _info: &ProtectedEntityInfo,
        options: CopyCreateOptions,
    ) -> Result<Box<dyn ProtectedEntity + 'a>> {
        Err(CustodianError::unsupported(format!("mem backend is read-only ({options})")))
    }

    fn delete(&self, _ctx: &Context, id: &ProtectedEntityId) -> Result<()> {
        Err(CustodianError::unsupported(format!("cannot delete {id}")))
    }
}

pub struct MemoryEntity<'a> {
    tm: &'a MemoryTypeManager,
    id: ProtectedEntityId,
    node: &'a Node,
}

impl ProtectedEntity for MemoryEntity<'_> {
    fn id(&self) -> &ProtectedEntityId {
        &self.id
    }

    fn info(&self, _ctx: &Context) -> Result<ProtectedEntityInfo> {
        let size = match &self.node.data {
            Some(DataSource::Bytes(bytes)) => bytes.len() as i64,
            _ => UNKNOWN_SIZE,
        };
        Ok(ProtectedEntityInfo::new(
            self.id.clone(),
            self.id.id(),
            size,
            vec![],
            vec![],
            vec![],
            self.node.children.iter().map(|c| mem_id(c)).collect(),
        ))
    }

    fn combined_info(&self, ctx: &Context) -> Result<Vec<ProtectedEntityInfo>> {
        Ok(vec![self.info(ctx)?])
    }

    fn snapshot(&self, _ctx: &Context) -> Result<ProtectedEntitySnapshotId> {
        Err(CustodianError::unsupported("mem entities cannot be snapshotted"))
    }

    fn list_snapshots(&self, _ctx: &Context) -> Result<Vec<ProtectedEntitySnapshotId>> {
        Ok(vec![])
    }

    fn delete_snapshot(&self, _ctx: &Context, _: &ProtectedEntitySnapshotId) -> Result<bool> {
        Ok(false)
    }

    fn info_for_snapshot(
        &self,
        _ctx: &Context,
        snapshot_id: &ProtectedEntitySnapshotId,
    ) -> Result<ProtectedEntityInfo> {
        Err(CustodianError::not_found(self.id.with_snapshot(snapshot_id.clone())?))
    }

    fn components<'b>(&'b self, ctx: &Context) -> Result<Vec<Box<dyn ProtectedEntity + 'b>>> {
        self.node
            .children
            .iter()
            .map(|child| self.tm.get_protected_entity(ctx, &mem_id(child)))
            .collect()
    }

    fn data_reader(&self, _ctx: &Context) -> Result<Option<EntityStream>> {
        let stream: EntityStream = match &self.node.data {
            None => return Ok(None),
            Some(DataSource::Bytes(bytes)) => Box::new(Cursor::new(bytes.clone())),
            Some(DataSource::Failing { prefix, message }) => Box::new(FailingReader {
                prefix: Cursor::new(prefix.clone()),
                error: Some(CustodianError::backend(message.clone())),
            }),
            Some(DataSource::Cancelling { prefix, ctx }) => Box::new(CancellingReader {
                prefix: Cursor::new(prefix.clone()),
                ctx: ctx.clone(),
            }),
        };
        Ok(Some(stream))
    }

    fn metadata_reader(&self, _ctx: &Context) -> Result<Option<EntityStream>> {
        Ok(self
            .node
            .metadata
            .clone()
            .map(|md| Box::new(Cursor::new(md)) as EntityStream))
    }
}

struct FailingReader {
    prefix: Cursor<Vec<u8>>,
    error: Option<CustodianError>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.prefix.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        match self.error.take() {
            Some(e) => Err(e.into_stream_io()),
            None => Err(io::Error::new(io::ErrorKind::Other, "stream already failed")),
        }
    }
}

struct CancellingReader {
    prefix: Cursor<Vec<u8>>,
    ctx: Context,
}

impl Read for CancellingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ctx.cancel();
        self.prefix.read(buf)
    }
}

/// Entry names of an archive, in archive order
pub fn entry_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Contents of one named entry
pub fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}
