/*!
Recursive archive serializer.

An entity becomes one ZIP container with entries written in a fixed order:

1. `<id>.peinfo` - the entity's [`ProtectedEntityInfo`](crate::ProtectedEntityInfo) as JSON
2. `<id>.md` - the metadata stream, when the entity has one
3. `<id>.data` - the data stream, when the entity has one
4. `components/<child-id>.zip` - one complete nested archive per component,
   in enumeration order, produced by the same algorithm

The container is written in streaming mode, so the target only needs
[`Write`]; no seeking happens and entity streams are never buffered whole.
The central directory is written only after every entry (including every
nested subtree) succeeded. On failure nothing further reaches the target, so
a failed archive never ends with a valid directory.
*/

use std::cell::Cell;
use std::io::{self, Seek, Write};
use std::rc::Rc;

use tracing::{debug, error, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::copy::stream_copy;
use crate::data_transport::{COMBINED_EXT, METADATA_EXT, PE_INFO_EXT};
use crate::observability::{record_archive_failed, record_archive_written};
use crate::{Context, CustodianError, ProtectedEntity, ProtectedEntityId, Result};

/// Extension of the data entry inside an archive.
pub const DATA_ENTRY_EXT: &str = ".data";

/// Directory prefix of nested component archives.
pub const COMPONENTS_DIR: &str = "components/";

/// Name of the info entry for `id`.
pub fn info_entry_name(id: &ProtectedEntityId) -> String {
    format!("{id}{PE_INFO_EXT}")
}

/// Name of the metadata entry for `id`.
pub fn metadata_entry_name(id: &ProtectedEntityId) -> String {
    format!("{id}{METADATA_EXT}")
}

/// Name of the data entry for `id`.
pub fn data_entry_name(id: &ProtectedEntityId) -> String {
    format!("{id}{DATA_ENTRY_EXT}")
}

/// Name of the nested archive entry for component `id`.
pub fn component_entry_name(id: &ProtectedEntityId) -> String {
    format!("{COMPONENTS_DIR}{id}{COMBINED_EXT}")
}

/// Serialize `pe` and all of its components into `writer`.
///
/// # Errors
/// A `Serialization` error naming the entity and stage that failed, or
/// `Cancelled` if `ctx` was cancelled.
pub fn write_archive(ctx: &Context, pe: &dyn ProtectedEntity, writer: &mut dyn Write) -> Result<()> {
    match write_entity(ctx, pe, writer) {
        Ok(()) => {
            record_archive_written();
            info!(id = %pe.id(), "Archive written");
            Ok(())
        }
        Err(e) => {
            record_archive_failed();
            error!(id = %pe.id(), error = %e, "Archive serialization failed");
            Err(e)
        }
    }
}

/// Forwards writes until aborted, then silently discards them.
///
/// `ZipWriter` finalizes itself on drop; discarding keeps that trailing
/// directory from reaching the target after a failure.
struct EntrySink<'w> {
    inner: &'w mut dyn Write,
    aborted: Rc<Cell<bool>>,
}

impl Write for EntrySink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.aborted.get() {
            return Ok(buf.len());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.aborted.get() {
            return Ok(());
        }
        self.inner.flush()
    }
}

fn write_entity(ctx: &Context, pe: &dyn ProtectedEntity, out: &mut dyn Write) -> Result<()> {
    ctx.check()?;
    let id = pe.id().clone();
    let aborted = Rc::new(Cell::new(false));
    let mut zip = ZipWriter::new_stream(EntrySink {
        inner: out,
        aborted: Rc::clone(&aborted),
    });

    if let Err(e) = write_entries(ctx, pe, &mut zip) {
        aborted.set(true);
        drop(zip);
        return Err(e);
    }

    let mut sink = zip
        .finish()
        .map_err(|e| CustodianError::serialization(&id, "archive directory", e.into()))?;
    sink.flush().map_err(|e| {
        CustodianError::serialization(&id, "archive directory", CustodianError::from_stream_io(e))
    })?;
    Ok(())
}

fn write_entries<W: Write + Seek>(
    ctx: &Context,
    pe: &dyn ProtectedEntity,
    zip: &mut ZipWriter<W>,
) -> Result<()> {
    let id = pe.id();
    let deflated = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    let stored = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    let info = pe
        .info(ctx)
        .map_err(|e| CustodianError::serialization(id, "info", e))?;
    let info_json = serde_json::to_vec_pretty(&info)
        .map_err(|e| CustodianError::serialization(id, "info", e.into()))?;
    zip.start_file(info_entry_name(id), deflated)
        .map_err(|e| CustodianError::serialization(id, "info", e.into()))?;
    zip.write_all(&info_json)
        .map_err(|e| CustodianError::serialization(id, "info", CustodianError::from_stream_io(e)))?;
    debug!(id = %id, bytes = info_json.len(), "Wrote info entry");

    if let Some(mut reader) = pe
        .metadata_reader(ctx)
        .map_err(|e| CustodianError::serialization(id, "metadata stream", e))?
    {
        zip.start_file(metadata_entry_name(id), deflated)
            .map_err(|e| CustodianError::serialization(id, "metadata stream", e.into()))?;
        let bytes = stream_copy(ctx, &mut reader, zip)
            .map_err(|e| CustodianError::serialization(id, "metadata stream", e))?;
        debug!(id = %id, bytes, "Wrote metadata entry");
    }

    if let Some(mut reader) = pe
        .data_reader(ctx)
        .map_err(|e| CustodianError::serialization(id, "data stream", e))?
    {
        zip.start_file(data_entry_name(id), deflated)
            .map_err(|e| CustodianError::serialization(id, "data stream", e.into()))?;
        let bytes = stream_copy(ctx, &mut reader, zip)
            .map_err(|e| CustodianError::serialization(id, "data stream", e))?;
        debug!(id = %id, bytes, "Wrote data entry");
    }

    let components = pe
        .components(ctx)
        .map_err(|e| CustodianError::serialization(id, "components", e))?;
    for child in &components {
        ctx.check()?;
        let child_id = child.id();
        let stage = format!("component {child_id}");
        zip.start_file(component_entry_name(child_id), stored)
            .map_err(|e| CustodianError::serialization(id, stage.as_str(), e.into()))?;
        write_entity(ctx, child.as_ref(), zip)
            .map_err(|e| CustodianError::serialization(id, stage.as_str(), e))?;
        debug!(id = %id, component = %child_id, "Wrote component archive");
    }

    Ok(())
}
