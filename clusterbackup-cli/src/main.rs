/*!
Clusterbackup CLI - Command-line interface for the cluster backup engine.

Captures the API objects of the cluster in the current kubeconfig context
into a `tar.gz` archive, restores archives, and prunes old ones. Archive
destinations are literal directories or sandboxed `host://` paths.
*/

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use clusterbackup_core::cluster::blocking::cancel_on_ctrl_c;
use clusterbackup_core::{
    init_observability, ArchiveInfo, BackupEngine, BackupOptions, CancelToken, CleanupReport,
    EngineConfig, KubeCluster, RetentionPolicy,
};
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Parser)]
#[command(name = "clusterbackup")]
#[command(about = "Back up, restore and prune cluster API object archives")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CLUSTERBACKUP_JSON_LOGS")]
    json_logs: bool,

    /// Sandbox root for host:// destinations
    #[arg(long, global = true)]
    host_root: Option<PathBuf>,

    /// Parent directory for temporary staging trees
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    /// Gzip compression level (0-9)
    #[arg(long, global = true)]
    compression_level: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DestinationArg {
    /// Archive directory: a local path or host:///path
    #[arg(short, long, env = "CLUSTERBACKUP_DESTINATION")]
    destination: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the cluster into a new archive
    Backup {
        #[command(flatten)]
        destination: DestinationArg,
        /// Only capture these namespaces (repeatable)
        #[arg(long = "include-namespace", value_name = "NAMESPACE")]
        include_namespaces: Vec<String>,
        /// Skip these namespaces (repeatable, ignored with --include-namespace)
        #[arg(long = "exclude-namespace", value_name = "NAMESPACE")]
        exclude_namespaces: Vec<String>,
        /// Do not capture cluster-scoped resources
        #[arg(long)]
        no_cluster_resources: bool,
        /// Kinds to capture (repeatable, defaults to the built-in set)
        #[arg(long = "resource-type", value_name = "KIND")]
        resource_types: Vec<String>,
    },
    /// Apply every object in an archive to the cluster
    Restore {
        #[command(flatten)]
        destination: DestinationArg,
        /// Archive file name, as shown by `list`
        #[arg(short, long)]
        archive: String,
    },
    /// Delete archives outside a retention policy
    Cleanup {
        #[command(flatten)]
        destination: DestinationArg,
        /// Delete archives older than this many days
        #[arg(long)]
        max_age_days: Option<u32>,
        /// Keep at most this many archives
        #[arg(long)]
        max_count: Option<usize>,
    },
    /// Delete every archive at a destination
    Purge {
        #[command(flatten)]
        destination: DestinationArg,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// List archives at a destination, oldest first
    List {
        #[command(flatten)]
        destination: DestinationArg,
    },
}

#[derive(Tabled)]
struct ArchiveRow {
    #[tabled(rename = "Archive")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

impl From<&ArchiveInfo> for ArchiveRow {
    fn from(archive: &ArchiveInfo) -> Self {
        Self {
            name: archive.name.clone(),
            size: format_size(archive.size_bytes),
            modified: archive
                .modified
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_observability(cli.json_logs)?;
    let engine = BackupEngine::new(engine_config(&cli)?);

    match cli.command {
        Commands::Backup {
            destination,
            include_namespaces,
            exclude_namespaces,
            no_cluster_resources,
            resource_types,
        } => {
            let options = BackupOptions {
                include_namespaces,
                exclude_namespaces,
                include_cluster_resources: !no_cluster_resources,
                resource_types,
            };
            backup(&engine, &destination.destination, &options)?
        }
        Commands::Restore {
            destination,
            archive,
        } => restore(&engine, &destination.destination, &archive)?,
        Commands::Cleanup {
            destination,
            max_age_days,
            max_count,
        } => {
            let policy = RetentionPolicy {
                max_age_days,
                max_count,
            };
            if policy.is_unbounded() {
                bail!("cleanup needs --max-age-days, --max-count or both");
            }
            let report = engine.run_cleanup(&destination.destination, &policy)?;
            print_cleanup(&report);
        }
        Commands::Purge { destination, force } => {
            if !force && !confirm(&format!(
                "Delete every archive at '{}'? (y/N): ",
                destination.destination
            ))? {
                println!("Purge cancelled");
                return Ok(());
            }
            let report = engine.run_purge(&destination.destination)?;
            print_cleanup(&report);
        }
        Commands::List { destination } => list(&engine, &destination.destination)?,
    }

    Ok(())
}

/// Environment configuration with command-line overrides applied.
fn engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::from_env()?;
    if let Some(root) = &cli.host_root {
        config.host_root = root.clone();
    }
    if let Some(dir) = &cli.staging_dir {
        config.staging_dir = Some(dir.clone());
    }
    if let Some(level) = cli.compression_level {
        config.compression_level = level;
    }
    config.validate()?;
    Ok(config)
}

fn interruptible() -> CancelToken {
    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());
    cancel
}

fn backup(engine: &BackupEngine, destination: &str, options: &BackupOptions) -> anyhow::Result<()> {
    let cluster = KubeCluster::connect().context("Failed to connect to the cluster")?;
    let cancel = interruptible();

    let result = engine.run_backup(&cluster, &cluster, destination, options, &cancel)?;
    println!("✓ Backup written to {}", result.archive_path.display());
    println!("  Objects: {}", result.object_count);
    println!("  Size: {}", format_size(result.archive_size));
    println!("  SHA-256: {}", result.sha256);
    println!("  Duration: {}ms", result.duration().num_milliseconds());
    Ok(())
}

fn restore(engine: &BackupEngine, destination: &str, archive: &str) -> anyhow::Result<()> {
    let cluster = KubeCluster::connect().context("Failed to connect to the cluster")?;
    let cancel = interruptible();

    info!(archive, "Restoring");
    let result = engine.run_restore(&cluster, destination, archive, &cancel)?;
    println!(
        "✓ Restored {} objects from {} ({} created, {} updated)",
        result.applied, result.archive_name, result.created, result.updated
    );
    Ok(())
}

fn list(engine: &BackupEngine, destination: &str) -> anyhow::Result<()> {
    let archives = engine.list_archives(destination)?;
    if archives.is_empty() {
        println!("No archives found");
        return Ok(());
    }
    let rows: Vec<ArchiveRow> = archives.iter().map(ArchiveRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn print_cleanup(report: &CleanupReport) {
    for name in report.deleted_by_age.iter().chain(&report.deleted_by_count) {
        println!("  deleted {name}");
    }
    println!(
        "✓ Deleted {} archives, {} retained",
        report.deleted(),
        report.retained
    );
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    use std::io::{self, Write};

    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase().starts_with('y'))
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_backup_flags() {
        let cli = Cli::try_parse_from([
            "clusterbackup",
            "--compression-level",
            "9",
            "backup",
            "-d",
            "host:///backups",
            "--exclude-namespace",
            "kube-system",
            "--resource-type",
            "ConfigMap",
            "--resource-type",
            "Secret",
            "--no-cluster-resources",
        ])
        .unwrap();
        assert_eq!(cli.compression_level, Some(9));
        match cli.command {
            Commands::Backup {
                destination,
                exclude_namespaces,
                resource_types,
                no_cluster_resources,
                ..
            } => {
                assert_eq!(destination.destination, "host:///backups");
                assert_eq!(exclude_namespaces, vec!["kube-system"]);
                assert_eq!(resource_types, vec!["ConfigMap", "Secret"]);
                assert!(no_cluster_resources);
            }
            _ => panic!("expected backup command"),
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
