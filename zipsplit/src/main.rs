use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use structopt::*;

use splitzip::{format_size, parse_size, CompressionMethod, EntryOptions, SplitZipWriter};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zipsplit",
    about = "Splits files and directories into multi-volume Zip archives"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences), global = true)]
    verbosity: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Create a split Zip archive
    Create {
        /// Path of the final .zip volume (e.g., backup.zip)
        #[structopt(short, long)]
        output: PathBuf,

        /// Maximum size per volume (e.g., 100MB, 700MiB, 4.7GB)
        #[structopt(short = "s", long = "split-size")]
        split_size: String,

        /// DEFLATE compression level (1-9)
        #[structopt(short, long, default_value = "6")]
        level: u32,

        /// Store entries without compression
        #[structopt(long)]
        store: bool,

        /// Files and directories to add
        #[structopt(name = "paths", required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    match args.command {
        Command::Create {
            output,
            split_size,
            level,
            store,
            paths,
        } => create(output, &split_size, level, store, &paths),
    }
}

fn create(
    output: PathBuf,
    split_size: &str,
    level: u32,
    store: bool,
    paths: &[PathBuf],
) -> Result<()> {
    let split_size = parse_size(split_size).context("Couldn't parse split size")?;

    let mut writer = SplitZipWriter::new(&output, split_size)
        .with_context(|| format!("Couldn't create archive at {}", output.display()))?;
    if store {
        writer.set_compression(CompressionMethod::Stored);
    } else {
        writer.set_level(level).context("Bad compression level")?;
    }
    writer.on_volume(|number, path| info!("Opened volume {}: {}", number, path.display()));
    writer.on_progress(|name, done, total| match total {
        Some(total) => debug!("{}: {}/{} bytes", name, done, total),
        None => debug!("{}: {} bytes", name, done),
    });

    let options = EntryOptions::default();
    for path in paths {
        info!("Adding {}", path.display());
        writer
            .add_path(path, None, &options)
            .with_context(|| format!("Couldn't add {}", path.display()))?;
    }
    let volumes = writer.close().context("Couldn't finalize archive")?;

    println!("Wrote {} volume(s):", volumes.len());
    for path in &volumes {
        let size = fs::metadata(path)
            .with_context(|| format!("Couldn't stat {}", path.display()))?
            .len();
        println!("  {}: {}", path.display(), format_size(size, false));
    }
    Ok(())
}
