//! susfs - drive the concealment core from the command line.
//!
//! Replays JSON command scripts against a fresh context, shows the mount
//! namespace as a concealed process would see it, and generates sus path
//! scripts from a directory tree.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use susfs::config::{SUSFS_VARIANT, SUSFS_VERSION};
use susfs::logging::init_logging;
use susfs::mount::{DryRunHost, MountHost, ProcMountHost, SweepScope};
use susfs::path::{Ino, SusPathname};
use susfs::registry::SusPathEntry;
use susfs::resolver::FsInodeResolver;
use susfs::{Command, Dispatcher, MountSweepEngine, SusfsConfig, SusfsContext};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "susfs")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Concealment registry and control-plane core",
    long_about = "Registers sus paths, sus mounts, spoofed kstat, try-umount targets and open redirects, and sweeps mount namespaces."
)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a command script against a fresh context
    Run {
        /// Script: one JSON command per line, or a JSON array
        script: PathBuf,

        /// Really unmount (default: log what would be unmounted)
        #[arg(long)]
        live: bool,

        /// Mountinfo file to sweep (default: /proc/self/mountinfo)
        #[arg(long)]
        mountinfo: Option<PathBuf>,

        /// Print the registries after the last command
        #[arg(long)]
        snapshot: bool,

        /// Re-resolve sus path loop entries on this system after the script
        #[arg(long)]
        reapply_loop: bool,
    },

    /// Show the mount namespace with sus mounts hidden
    Mounts {
        /// Script registering the sus mounts
        script: PathBuf,

        /// Mountinfo file to read (default: /proc/self/mountinfo)
        #[arg(long)]
        mountinfo: Option<PathBuf>,
    },

    /// Emit an add_sus_path_loop command for a directory tree
    Scan {
        /// Directory to walk
        dir: PathBuf,

        /// Maximum depth below the directory
        #[arg(long, default_value = "1")]
        max_depth: usize,
    },

    /// Show version, variant and capabilities
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SusfsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SusfsConfig::default(),
    };

    match cli.command {
        Commands::Run {
            script,
            live,
            mountinfo,
            snapshot,
            reapply_loop,
        } => cmd_run(&config, &script, live, mountinfo, snapshot, reapply_loop),

        Commands::Mounts { script, mountinfo } => cmd_mounts(&config, &script, mountinfo),

        Commands::Scan { dir, max_depth } => cmd_scan(&dir, max_depth),

        Commands::Info => cmd_info(&config),
    }
}

fn proc_host(mountinfo: Option<PathBuf>) -> ProcMountHost {
    match mountinfo {
        Some(path) => ProcMountHost::with_mountinfo(path),
        None => ProcMountHost::new(),
    }
}

fn load_script(path: &Path) -> Result<Vec<Command>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    Command::parse_script(&text).with_context(|| format!("parsing script {}", path.display()))
}

fn cmd_run(
    config: &SusfsConfig,
    script: &Path,
    live: bool,
    mountinfo: Option<PathBuf>,
    snapshot: bool,
    reapply_loop: bool,
) -> Result<()> {
    let commands = load_script(script)?;
    let ctx = Arc::new(SusfsContext::new(config)?);

    let host = proc_host(mountinfo);
    let host: Arc<dyn MountHost> = if live {
        Arc::new(host)
    } else {
        Arc::new(DryRunHost::new(host))
    };
    log::debug!("replaying {} commands on {}", commands.len(), host.name());
    let dispatcher = Dispatcher::new(ctx.clone(), host);

    let mut failed = 0;
    for command in &commands {
        let opcode = command.opcode();
        let reply = dispatcher.dispatch_raw(opcode.code(), &command.encode()?);
        if !reply.status.is_success() {
            failed += 1;
        }
        println!(
            "{:#04x} {:<32} {}",
            opcode.code(),
            opcode.to_string(),
            serde_json::to_string(&reply)?
        );
    }

    if reapply_loop {
        let applied = ctx.reapply_sus_path_loop(&FsInodeResolver);
        println!("sus path loop: {} entries re-resolved", applied);
    }

    if snapshot {
        println!("{}", serde_json::to_string_pretty(&ctx.snapshot())?);
    }

    println!();
    println!("{} commands, {} failed", commands.len(), failed);
    if failed > 0 {
        std::process::exit(2);
    }

    Ok(())
}

fn cmd_mounts(config: &SusfsConfig, script: &Path, mountinfo: Option<PathBuf>) -> Result<()> {
    let ctx = Arc::new(SusfsContext::new(config)?);
    let host = DryRunHost::new(proc_host(mountinfo));
    let dispatcher = Dispatcher::new(ctx.clone(), Arc::new(host.clone()));

    for command in load_script(script)? {
        dispatcher
            .dispatch(command)
            .context("applying script command")?;
    }

    let mounts = host.snapshot().context("reading mount namespace")?;
    let total = mounts.len();
    let visible = MountSweepEngine::new(ctx).filter_visible(mounts, SweepScope::AppSpawn);

    for mount in &visible {
        println!("{:>6}  {:>10}  {}", mount.mount_id, mount.dev, mount.pathname);
    }
    println!();
    println!("{} mounts, {} hidden", total, total - visible.len());

    Ok(())
}

fn cmd_scan(dir: &Path, max_depth: usize) -> Result<()> {
    let mut entries = Vec::new();

    let root = dir
        .canonicalize()
        .with_context(|| format!("resolving {}", dir.display()))?;

    for entry in WalkDir::new(&root).min_depth(1).max_depth(max_depth) {
        let entry = entry?;
        let Some(path) = entry.path().to_str() else {
            log::warn!("skipping non UTF-8 path {}", entry.path().display());
            continue;
        };

        let pathname = match SusPathname::new(path) {
            Ok(pathname) => pathname,
            Err(e) => {
                log::warn!("skipping {}: {}", path, e);
                continue;
            }
        };
        let ino = Ino(entry.metadata()?.ino());
        entries.push(SusPathEntry::new(ino, pathname));
    }

    if entries.is_empty() {
        anyhow::bail!("no entries under {}", dir.display());
    }

    println!(
        "{}",
        serde_json::to_string(&Command::AddSusPathLoop(entries))?
    );

    Ok(())
}

fn cmd_info(config: &SusfsConfig) -> Result<()> {
    let ctx = SusfsContext::new(config)?;
    let settings = ctx.settings();

    println!("SUSFS Information");
    println!("=================");
    println!("Version:          {}", SUSFS_VERSION);
    println!("Variant:          {}", SUSFS_VARIANT);
    println!("Android data:     {}", settings.android_data_root);
    println!("Sdcard:           {}", settings.sdcard_root);
    println!();
    println!("Capabilities:");
    for (feature, enabled) in ctx.features().all() {
        let mark = if enabled { '+' } else { '-' };
        println!("  {} {:<16} {}", mark, feature, feature.config_name());
    }

    Ok(())
}
