/*!
Streaming copy engine.

A copy moves bytes from a source to a destination in one linear pass. When
the source is a protected entity its archive is produced on a scoped
background thread and handed over through a bounded [`conduit`](crate::conduit),
so memory use is independent of the entity size.
*/

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::archive::write_archive;
use crate::conduit::{self, PipeWriter};
use crate::observability::{record_copy, record_copy_failure};
use crate::{
    Context, CustodianError, ProtectedEntity, ProtectedEntityId, ProtectedEntityManager, Result,
};

const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Where copied bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    Entity(ProtectedEntityId),
    File(PathBuf),
}

impl CopySource {
    /// An argument that parses as an identifier names an entity; anything
    /// else is a file path.
    pub fn parse(arg: &str) -> Self {
        match arg.parse::<ProtectedEntityId>() {
            Ok(id) => Self::Entity(id),
            Err(_) => Self::File(PathBuf::from(arg)),
        }
    }
}

impl fmt::Display for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "{id}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Where copied bytes go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyDestination {
    Entity(ProtectedEntityId),
    File(PathBuf),
}

impl CopyDestination {
    /// Same resolution rule as [`CopySource::parse`].
    pub fn parse(arg: &str) -> Self {
        match arg.parse::<ProtectedEntityId>() {
            Ok(id) => Self::Entity(id),
            Err(_) => Self::File(PathBuf::from(arg)),
        }
    }
}

impl fmt::Display for CopyDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "{id}"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub bytes_copied: u64,
}

/// Copies between files and protected entities resolved through a manager.
pub struct CopyEngine<'m> {
    manager: &'m ProtectedEntityManager,
    conduit_capacity: usize,
}

impl<'m> CopyEngine<'m> {
    pub fn new(manager: &'m ProtectedEntityManager) -> Self {
        Self {
            manager,
            conduit_capacity: conduit::DEFAULT_CAPACITY,
        }
    }

    /// Bound the number of bytes buffered between producer and consumer.
    pub fn with_conduit_capacity(mut self, capacity: usize) -> Self {
        self.conduit_capacity = capacity.max(1);
        self
    }

    /// Copy `source` into `destination`, returning the number of bytes
    /// written.
    ///
    /// # Errors
    /// - `UnsupportedOperation` when the destination is a protected entity
    /// - `Cancelled` when `ctx` is cancelled mid-copy
    /// - `StreamTruncated` carrying the bytes already written when the source
    ///   fails part way; the partial destination file is removed
    pub fn copy(
        &self,
        ctx: &Context,
        source: &CopySource,
        destination: &CopyDestination,
    ) -> Result<CopyReport> {
        ctx.check()?;
        let dest_path = match destination {
            CopyDestination::Entity(id) => {
                return Err(CustodianError::unsupported(format!(
                    "copy into protected entity {id}: import must go through its type manager"
                )));
            }
            CopyDestination::File(path) => path,
        };

        let started = Instant::now();
        info!(source = %source, destination = %destination, "Starting copy");

        let outcome = match source {
            CopySource::File(src_path) => {
                let mut reader = File::open(src_path)?;
                let file = File::create(dest_path)?;
                copy_into_file(dest_path, file, |out, transferred| {
                    copy_counted(ctx, &mut reader, out, transferred)
                })
            }
            CopySource::Entity(id) => {
                let pe = self.manager.get_protected_entity(ctx, id)?;
                let file = File::create(dest_path)?;
                copy_into_file(dest_path, file, |out, transferred| {
                    self.stream_archive(ctx, pe.as_ref(), out, transferred)
                })
            }
        };

        match outcome {
            Ok(bytes_copied) => {
                record_copy(bytes_copied, started.elapsed());
                info!(
                    source = %source,
                    destination = %destination,
                    bytes = bytes_copied,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Copy complete"
                );
                Ok(CopyReport { bytes_copied })
            }
            Err((bytes_transferred, e)) => {
                record_copy_failure(bytes_transferred);
                error!(
                    source = %source,
                    destination = %destination,
                    bytes = bytes_transferred,
                    error = %e,
                    "Copy failed"
                );
                if e.is_cancelled() {
                    Err(CustodianError::Cancelled)
                } else {
                    Err(CustodianError::StreamTruncated {
                        bytes_transferred,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    /// Run the archive serializer as a producer and drain its output into
    /// `out`.
    fn stream_archive(
        &self,
        ctx: &Context,
        pe: &dyn ProtectedEntity,
        out: &mut dyn Write,
        transferred: &mut u64,
    ) -> Result<()> {
        let (writer, mut reader) = conduit::pipe(self.conduit_capacity, ctx);

        thread::scope(|scope| {
            let producer = scope.spawn(move || produce_archive(ctx, pe, writer));

            let consumed = copy_counted(ctx, &mut reader, out, transferred);
            // Unblocks the producer if the consumer stopped early.
            drop(reader);

            match producer.join() {
                Ok(()) => consumed,
                Err(_) => consumed.and(Err(CustodianError::backend("archive producer panicked"))),
            }
        })
    }
}

/// Run `transfer` against the freshly created `file` at `path`, removing
/// it again if anything fails.
fn copy_into_file<F>(
    path: &Path,
    file: File,
    transfer: F,
) -> std::result::Result<u64, (u64, CustodianError)>
where
    F: FnOnce(&mut BufWriter<File>, &mut u64) -> Result<()>,
{
    let mut out = BufWriter::new(file);
    let mut transferred = 0u64;

    let result = transfer(&mut out, &mut transferred).and_then(|()| {
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(())
    });

    match result {
        Ok(()) => Ok(transferred),
        Err(e) => {
            drop(out);
            if let Err(remove_err) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %remove_err, "Failed to remove partial copy");
            }
            Err((transferred, e))
        }
    }
}

/// Serialize `pe` into the conduit, always signalling the end of stream.
fn produce_archive(ctx: &Context, pe: &dyn ProtectedEntity, mut writer: PipeWriter) {
    match write_archive(ctx, pe, &mut writer) {
        Ok(()) => writer.close(),
        Err(e) => {
            debug!(id = %pe.id(), error = %e, "Archive producer failed");
            writer.fail(e);
        }
    }
}

/// Copy every byte from `reader` to `writer`, returning the byte count.
///
/// Cancellation is checked between chunks.
pub fn stream_copy<R, W>(ctx: &Context, reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut transferred = 0;
    copy_counted(ctx, reader, writer, &mut transferred)?;
    Ok(transferred)
}

fn copy_counted<R, W>(ctx: &Context, reader: &mut R, writer: &mut W, transferred: &mut u64) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        ctx.check()?;
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CustodianError::from_stream_io(e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(CustodianError::from_stream_io)?;
        *transferred += n as u64;
    }
}
