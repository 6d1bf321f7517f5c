use anyhow::Context;
use clap::{Parser, Subcommand};
use rofs_core::{BlockDevice, FileDevice, ReadConfig};
use rofs_filesystems::ondisk::constants::{SUPER_OFFSET, SUPER_SIZE};
use rofs_filesystems::{ExtentFlags, RofsImage, Superblock};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rofs")]
#[command(about = "Inspect and read read-only filesystem images", long_about = None)]
struct Cli {
    /// JSON file with read tuning (fan_out_limit, io_workers, ...)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the superblock of an image
    Info {
        image: PathBuf,
    },
    /// List the extents of an inode
    Map {
        image: PathBuf,
        #[arg(long)]
        nid: u64,
    },
    /// Look up the physical block behind a logical block
    Bmap {
        image: PathBuf,
        #[arg(long)]
        nid: u64,
        #[arg(long)]
        block: u64,
    },
    /// Write the content of an inode to stdout
    Cat {
        image: PathBuf,
        #[arg(long)]
        nid: u64,
    },
}

/// Open an image file with the block size its superblock declares.
fn open_image(path: &Path, config: ReadConfig) -> anyhow::Result<RofsImage> {
    let probe = FileDevice::open(path, 512)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let raw = probe.read_at(SUPER_OFFSET, SUPER_SIZE)?;
    let block_size = Superblock::decode(&raw)?.block_size();
    debug!(block_size, "probed superblock");

    let device = Arc::new(FileDevice::open(path, block_size)?);
    Ok(RofsImage::open(device, config)?)
}

fn print_info(image: &RofsImage, out: &mut impl Write) -> std::io::Result<()> {
    let sb = image.superblock();
    let built = chrono::DateTime::from_timestamp(sb.build_time as i64, sb.build_time_nsec)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "invalid".to_string());

    writeln!(out, "Volume:        {}", if sb.volume_name.is_empty() { "(none)" } else { sb.volume_name.as_str() })?;
    writeln!(out, "UUID:          {}", sb.uuid)?;
    writeln!(out, "Block size:    {} bytes", sb.block_size())?;
    writeln!(out, "Blocks:        {}", sb.blocks)?;
    writeln!(out, "Inodes:        {}", sb.inos)?;
    writeln!(out, "Root nid:      {}", sb.root_nid)?;
    writeln!(out, "Meta blkaddr:  {}", sb.meta_blkaddr)?;
    writeln!(out, "Built:         {}", built)?;
    writeln!(out, "Checksum:      {}", if sb.has_checksum() { "crc32c" } else { "none" })
}

fn run(command: Commands, config: ReadConfig, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Commands::Info { image } => {
            let image = open_image(&image, config)?;
            print_info(&image, out)?;
        }
        Commands::Map { image, nid } => {
            let image = open_image(&image, config)?;
            let inode = image.inode(nid)?;
            writeln!(out, "nid {}: {:?}, {} bytes", nid, inode.datalayout, inode.size)?;

            for extent in image.extents(&inode)? {
                let kind = match extent.flags {
                    ExtentFlags::Mapped => "data",
                    ExtentFlags::Meta => "inline",
                    ExtentFlags::Unmapped => "hole",
                };
                writeln!(
                    out,
                    "  {:>12} +{:<10} -> {:>14}  {}",
                    extent.logical, extent.length, extent.physical, kind
                )?;
            }
        }
        Commands::Bmap { image, nid, block } => {
            let image = open_image(&image, config)?;
            let inode = image.inode(nid)?;
            writeln!(out, "{}", image.bmap(&inode, block))?;
        }
        Commands::Cat { image, nid } => {
            let image = open_image(&image, config)?;
            let inode = image.inode(nid)?;
            let data = image.read_file(&inode)?;
            out.write_all(&data)?;

            let stats = image.io_stats();
            debug!(requests = stats.requests, pages = stats.pages, "read complete");
        }
    }

    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ReadConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ReadConfig::default(),
    };

    run(cli.command, config, &mut std::io::stdout().lock())
}
