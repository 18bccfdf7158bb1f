//! Command-line access to System V shared memory segments.
//!
//! Lets operators (and tests that need a second process) create, inspect,
//! read, write and remove segments by identifier:
//!
//! ```text
//! $ shm-segment create --size 4096 --fill 0xab
//! 32770
//! $ shm-segment read --id 32770 --len 4
//! abababab
//! $ shm-segment write --id 32770 --offset 1 cd
//! $ shm-segment info --id 32770 --json
//! $ shm-segment remove --id 32770
//! ```
//!
//! Data goes to stdout, logs to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use shm_segment::{SegmentId, SegmentMode};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "shm-segment",
    about = "Create, inspect and remove System V shared memory segments",
    version
)]
struct Cli {
    /// Tracing filter directive (e.g. `debug`, `shm_segment=trace`)
    #[arg(long, global = true, env = "SHM_SEGMENT_LOG", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a segment that outlives this process and print its id
    Create {
        /// Size in bytes
        #[arg(long)]
        size: u32,

        /// Permission bits in octal
        #[arg(long, default_value_t = SegmentMode::WORLD)]
        mode: SegmentMode,

        /// Fill every byte with this value (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_byte)]
        fill: Option<u8>,
    },

    /// Print the host status of a segment
    Info {
        /// Segment id
        #[arg(long)]
        id: SegmentId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print segment bytes as hex
    Read {
        /// Segment id
        #[arg(long)]
        id: SegmentId,

        /// First byte to read
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Number of bytes (default: up to the end of the segment)
        #[arg(long)]
        len: Option<usize>,
    },

    /// Write hex-encoded bytes into a segment
    Write {
        /// Segment id
        #[arg(long)]
        id: SegmentId,

        /// First byte to write
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Bytes to write, hex encoded
        data: String,
    },

    /// Mark a segment for removal
    Remove {
        /// Segment id
        #[arg(long)]
        id: SegmentId,
    },
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid byte {s:?}: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli.command)
}

#[cfg(unix)]
fn run(command: Command) -> Result<()> {
    use anyhow::{Context, ensure};
    use shm_segment::{Segment, SegmentConfig};

    match command {
        Command::Create { size, mode, fill } => {
            let config = SegmentConfig::new()
                .with_mode(mode)
                .with_zero_fill(fill.is_some());
            let mut segment = Segment::create_with_config(&config, size)
                .with_context(|| format!("creating {size}-byte segment"))?;
            if let Some(byte) = fill {
                segment.as_mut_slice()?.fill(byte);
            }
            let id = segment.persist()?;
            tracing::info!(%id, size, %mode, "segment created");
            println!("{id}");
        }

        Command::Info { id, json } => {
            let info = Segment::open(id)?.info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("id:            {}", info.id);
                println!("size:          {}", info.size);
                println!("attached:      {}", info.attach_count);
                println!("mode:          {}", info.mode);
                println!("creator pid:   {}", info.creator_pid);
                println!("last pid:      {}", info.last_pid);
                println!("marked:        {}", info.marked_for_removal);
            }
        }

        Command::Read { id, offset, len } => {
            let mut segment = Segment::open(id)?;
            segment.attach()?;
            let bytes = segment.as_slice()?;
            ensure!(
                offset <= bytes.len(),
                "offset {offset} is past the end of the {}-byte segment",
                bytes.len()
            );
            let end = len.map_or(bytes.len(), |len| offset.saturating_add(len));
            ensure!(
                end <= bytes.len(),
                "range {offset}..{end} is past the end of the {}-byte segment",
                bytes.len()
            );
            println!("{}", hex::encode(&bytes[offset..end]));
        }

        Command::Write { id, offset, data } => {
            let data = hex::decode(data.trim()).context("decoding hex data")?;
            let mut segment = Segment::open(id)?;
            segment.attach()?;
            let bytes = segment.as_mut_slice()?;
            let end = offset.saturating_add(data.len());
            ensure!(
                end <= bytes.len(),
                "range {offset}..{end} is past the end of the {}-byte segment",
                bytes.len()
            );
            bytes[offset..end].copy_from_slice(&data);
            tracing::info!(%id, offset, len = data.len(), "segment written");
        }

        Command::Remove { id } => {
            Segment::open(id)?.release()?;
            tracing::info!(%id, "segment marked for removal");
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn run(_command: Command) -> Result<()> {
    anyhow::bail!("System V shared memory is only available on Unix hosts")
}
