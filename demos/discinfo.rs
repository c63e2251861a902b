//! discinfo
//!
//! Command-line front-end: prints image information, validates sectors and
//! looks for LibCrypt protection in subchannel captures.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use cdinspect::scan::{self, ScanOptions};
use cdinspect::{info, libcrypt, psx};
use cdinspect::{BrowserOptions, CdResult, ImageBrowser, Policy, SubchannelLayout};

#[derive(Parser)]
#[command(name = "discinfo")]
#[command(about = "Inspect raw CD-ROM/PlayStation data tracks", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print filesystem and PlayStation information
    Info {
        /// Fail on corrupt directory records instead of skipping them
        #[arg(long)]
        strict: bool,

        /// List every file with its extent
        #[arg(long)]
        file_offsets: bool,

        /// Raw 2352 byte/sector data tracks
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Validate the EDC/ECC of every sector
    Scan {
        /// Number of worker threads (defaults to the available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Raw 2352 byte/sector tracks
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Look for LibCrypt sectors and write an SBI file
    Libcrypt {
        /// Subchannel capture layout
        #[arg(short, long, value_enum, default_value_t = Layout::Deinterleaved)]
        layout: Layout,

        /// Output SBI file (defaults to the capture path with an .sbi extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Subchannel capture
        sub: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// 96 bytes per sector, channels interleaved bitwise
    Interleaved,
    /// 96 bytes per sector, one channel after the other (CloneCD)
    Deinterleaved,
    /// 12 bytes of Q per sector
    Q,
}

impl From<Layout> for SubchannelLayout {
    fn from(l: Layout) -> SubchannelLayout {
        match l {
            Layout::Interleaved => SubchannelLayout::Interleaved,
            Layout::Deinterleaved => SubchannelLayout::Deinterleaved,
            Layout::Q => SubchannelLayout::QOnly,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Info {
            strict,
            file_offsets,
            images,
        } => {
            let options = BrowserOptions {
                record_policy: if strict { Policy::Strict } else { Policy::Lenient },
            };

            for image in &images {
                if let Err(e) = print_info(image, options, file_offsets) {
                    println!("{}: skipped {{{}}}", image.display(), e);
                }
            }
        }
        Commands::Scan { workers, images } => {
            let mut options = ScanOptions::default();
            if let Some(w) = workers {
                options.workers = w;
            }

            for image in &images {
                match scan::scan_image(image, &options) {
                    Ok(stats) => println!("{}: {:#?}", image.display(), stats),
                    Err(e) => println!("{}: skipped {{{}}}", image.display(), e),
                }
            }
        }
        Commands::Libcrypt {
            layout,
            output,
            sub,
        } => {
            let sbi = output.unwrap_or_else(|| sub.with_extension("sbi"));

            match libcrypt::detect_file(&sub, &sbi, layout.into()) {
                Ok(report) => {
                    for sector in &report.sectors {
                        println!("{}", sector);
                    }

                    if !report.unclassified.is_empty() {
                        println!(
                            "{} unrecognized Q CRC errors: {:?}",
                            report.unclassified.len(),
                            report.unclassified
                        );
                    }
                }
                Err(e) => println!("{}: skipped {{{}}}", sub.display(), e),
            }
        }
    }
}

fn print_info(path: &Path, options: BrowserOptions, file_offsets: bool) -> CdResult<()> {
    let report = info_report(path, options, file_offsets)?;

    println!("{}:", path.display());
    for line in report {
        println!("\t{}", line);
    }

    Ok(())
}

/// Gather every line first so that a failing image prints nothing but the error
fn info_report(path: &Path, options: BrowserOptions, file_offsets: bool) -> CdResult<Vec<String>> {
    let mut browser = ImageBrowser::open(path, options)?;
    let mut lines = Vec::new();

    let pvd = browser.pvd();
    lines.push(format!("System: {}", pvd.system_identifier));
    lines.push(format!("Volume: {}", pvd.volume_identifier));
    lines.push(format!("Sectors count: {}", browser.track_size()));

    let mut file = std::fs::File::open(path)?;
    let start = info::start_msf(&mut file)?;
    lines.push(format!("Start MSF: {:02x}:{:02x}:{:02x}", start[0], start[1], start[2]));

    let edc = info::mode2_form2_edc(&mut file, browser.track_size())?;
    lines.push(format!("Mode2Form2 EDC: {}", if edc { "Yes" } else { "No" }));

    match info::newest_date(&mut browser)? {
        Some(date) => lines.push(format!("Newest date: {}", date.format("%Y-%m-%d"))),
        None => lines.push("Newest date: <unavailable>".to_string()),
    }

    let launcher = psx::extract_exe_path(&mut browser)?;
    lines.push(format!("Launcher: {}", launcher.as_deref().unwrap_or("<unavailable>")));

    let serial = psx::extract_serial(&mut browser)?;
    lines.push(format!("Serial: {}", serial.as_deref().unwrap_or("<unavailable>")));

    let anti_modchip = psx::detect_anti_modchip(&mut browser)?;
    if !anti_modchip.is_empty() {
        lines.push("Anti-Modchip:".to_string());

        for finding in &anti_modchip {
            lines.push(format!("\t{}", finding));
        }
    }

    if file_offsets {
        for extent in info::file_extents(&mut browser)? {
            lines.push(extent.to_string());
        }
    }

    Ok(lines)
}
