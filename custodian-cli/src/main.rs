/*!
Custodian CLI - inspect, snapshot and copy protected entities.

Backends are configured from a directory holding `pes/<type>.pe.json`
parameter files and an optional `s3config.json`.
*/

use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use custodian_core::{
    observability::init_tracing, Context, CopyDestination, CopyEngine, CopySource,
    ManagerConfig, ProtectedEntityId, ProtectedEntityInfo, ProtectedEntityManager, UNKNOWN_SIZE,
};
use tabled::{Table, Tabled};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "custodian")]
#[command(about = "Snapshot, inspect and copy protected entities")]
#[command(version)]
struct Cli {
    /// Configuration directory
    #[arg(
        short,
        long,
        global = true,
        env = "CUSTODIAN_CONF_DIR",
        default_value = "/etc/custodian"
    )]
    conf_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured entity types
    Types,
    /// List protected entities of a type
    Ls {
        /// Entity type, e.g. `fs`
        pe_type: String,
        /// Show size and snapshot counts
        #[arg(short, long)]
        detailed: bool,
    },
    /// List snapshots of a protected entity
    Lssn {
        /// Entity id (`type:id`)
        id: ProtectedEntityId,
    },
    /// Take a snapshot of a protected entity
    Snap {
        /// Entity id (`type:id`)
        id: ProtectedEntityId,
    },
    /// Delete a snapshot
    Rmsn {
        /// Snapshot id (`type:id:snapshot`)
        id: ProtectedEntityId,
    },
    /// Copy an entity into an archive file, or a file to a file
    Cp {
        /// Entity id or file path
        src: String,
        /// Destination file path
        dest: String,
    },
    /// Print an entity's info as JSON
    Info {
        /// Entity id, optionally with a snapshot
        id: ProtectedEntityId,
    },
}

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Snapshots")]
    snapshots: usize,
    #[tabled(rename = "Components")]
    components: usize,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs)?;

    let config = ManagerConfig::from_dir(&cli.conf_dir)
        .with_context(|| format!("loading configuration from {}", cli.conf_dir.display()))?;
    let manager = ProtectedEntityManager::from_config(&config)?;
    debug!(manager = ?manager, "Protected entity manager ready");
    let ctx = Context::new();

    match cli.command {
        Commands::Types => list_types(&manager),
        Commands::Ls { pe_type, detailed } => list_entities(&ctx, &manager, &pe_type, detailed)?,
        Commands::Lssn { id } => list_snapshots(&ctx, &manager, &id)?,
        Commands::Snap { id } => take_snapshot(&ctx, &manager, &id)?,
        Commands::Rmsn { id } => remove_snapshot(&ctx, &manager, &id)?,
        Commands::Cp { src, dest } => copy(&ctx, &manager, &src, &dest)?,
        Commands::Info { id } => show_info(&ctx, &manager, &id)?,
    }

    Ok(())
}

fn list_types(manager: &ProtectedEntityManager) {
    let types = manager.list_entity_type_managers();
    if types.is_empty() {
        println!("No entity types configured");
    }
    for tm in types {
        println!("{}", tm.type_name());
    }
}

fn list_entities(
    ctx: &Context,
    manager: &ProtectedEntityManager,
    pe_type: &str,
    detailed: bool,
) -> Result<(), anyhow::Error> {
    let Some(tm) = manager.get_type_manager(pe_type) else {
        bail!("no type manager configured for '{pe_type}'");
    };
    let ids = tm.get_protected_entities(ctx)?;
    if ids.is_empty() {
        println!("No protected entities found");
        return Ok(());
    }

    if !detailed {
        for id in ids {
            println!("{id}");
        }
        return Ok(());
    }

    let mut rows = Vec::with_capacity(ids.len());
    for id in &ids {
        let pe = tm.get_protected_entity(ctx, id)?;
        let info = pe.info(ctx)?;
        rows.push(EntityRow {
            id: id.to_string(),
            name: info.name().to_string(),
            size: format_size(info.size()),
            snapshots: pe.list_snapshots(ctx)?.len(),
            components: info.component_ids().len(),
        });
    }
    println!("{}", Table::new(rows));
    Ok(())
}

fn list_snapshots(
    ctx: &Context,
    manager: &ProtectedEntityManager,
    id: &ProtectedEntityId,
) -> Result<(), anyhow::Error> {
    let pe = manager.get_protected_entity(ctx, id)?;
    let snapshots = pe.list_snapshots(ctx)?;
    if snapshots.is_empty() {
        println!("No snapshots found");
    }
    for snapshot in snapshots {
        println!("{}", id.with_snapshot(snapshot)?);
    }
    Ok(())
}

fn take_snapshot(
    ctx: &Context,
    manager: &ProtectedEntityManager,
    id: &ProtectedEntityId,
) -> Result<(), anyhow::Error> {
    let pe = manager.get_protected_entity(ctx, id)?;
    let snapshot = pe.snapshot(ctx)?;
    let snapshot_id = id.with_snapshot(snapshot)?;
    info!(id = %snapshot_id, "Snapshot created");
    println!("{snapshot_id}");
    Ok(())
}

fn remove_snapshot(
    ctx: &Context,
    manager: &ProtectedEntityManager,
    id: &ProtectedEntityId,
) -> Result<(), anyhow::Error> {
    let Some(snapshot) = id.snapshot_id() else {
        bail!("{id} does not name a snapshot");
    };
    let pe = manager.get_protected_entity(ctx, &id.base_id())?;
    if pe.delete_snapshot(ctx, snapshot)? {
        println!("✓ Snapshot {id} deleted");
    } else {
        println!("Snapshot {id} not found, nothing deleted");
    }
    Ok(())
}

fn copy(
    ctx: &Context,
    manager: &ProtectedEntityManager,
    src: &str,
    dest: &str,
) -> Result<(), anyhow::Error> {
    let source = CopySource::parse(src);
    let destination = CopyDestination::parse(dest);
    let report = CopyEngine::new(manager)
        .copy(ctx, &source, &destination)
        .with_context(|| format!("copying {source} to {destination}"))?;
    println!(
        "✓ Copied {source} to {destination} ({})",
        format_size(report.bytes_copied as i64)
    );
    Ok(())
}

fn show_info(
    ctx: &Context,
    manager: &ProtectedEntityManager,
    id: &ProtectedEntityId,
) -> Result<(), anyhow::Error> {
    let info: ProtectedEntityInfo = match id.snapshot_id() {
        Some(snapshot) => manager
            .get_protected_entity(ctx, &id.base_id())?
            .info_for_snapshot(ctx, snapshot)?,
        None => manager.get_protected_entity(ctx, id)?.info(ctx)?,
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn format_size(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes == UNKNOWN_SIZE {
        return "unknown".to_string();
    }
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
