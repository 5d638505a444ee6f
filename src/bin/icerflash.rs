//! icerflash CLI - flash-backed ICER compression utility.
//!
//! Runs the streaming compression pipeline against a working directory that
//! stands in for the device's block storage.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;

use icerflash_rs::flash::pipeline::{compress_jpeg_to_icer, CompressionConfig};
use icerflash_rs::flash::{jpeg_stream, names, yuv};
use icerflash_rs::icer::segment::{SegmentHeader, HEADER_BYTES};
use icerflash_rs::icer::wavelet::Filter;
use icerflash_rs::storage::DiskStorage;

/// Flash-backed ICER compression for embedded camera images
#[derive(Parser)]
#[command(name = "icerflash")]
#[command(author = "icerflash-rs contributors")]
#[command(version)]
#[command(about = "Compress JPEG stills into ICER bitstreams with bounded RAM", long_about = None)]
#[command(after_help = "EXAMPLES:
    icerflash compress -i still.jpg -o still.icer
    icerflash compress -i still.jpg -o still.icer --stages 4 --segments 6 --target-size 262144
    icerflash split -i still.jpg --workdir /tmp/icer
    icerflash info -i still.icer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: JPEG -> YUV -> wavelet -> ICER bitstream
    #[command(visible_alias = "c")]
    Compress {
        /// Input JPEG file
        #[arg(short, long)]
        input: PathBuf,

        /// Output ICER bitstream file
        #[arg(short, long)]
        output: PathBuf,

        /// Wavelet decomposition stages (1-6)
        #[arg(long, default_value = "4")]
        stages: u8,

        /// Lifting filter
        #[arg(long, default_value = "a", value_enum)]
        filter: FilterArg,

        /// Error-containment segments per subband
        #[arg(long, default_value = "6")]
        segments: u8,

        /// Target compressed size in bytes (0 = lossless)
        #[arg(long, default_value = "0")]
        target_size: usize,

        /// Auxiliary scratch pool size in bytes (0 disables it)
        #[arg(long, default_value = "524288")]
        aux_pool: usize,

        /// Working directory standing in for device storage
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Decode and split only: report dimensions, leave channel planes behind
    #[command(visible_alias = "s")]
    Split {
        /// Input JPEG file
        #[arg(short, long)]
        input: PathBuf,

        /// Working directory for the plane files
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Walk the segment headers of an ICER bitstream
    #[command(visible_alias = "i")]
    Info {
        /// Input ICER bitstream file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FilterArg {
    A,
    B,
    C,
    D,
    E,
    F,
    Q,
}

impl From<FilterArg> for Filter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::A => Filter::A,
            FilterArg::B => Filter::B,
            FilterArg::C => Filter::C,
            FilterArg::D => Filter::D,
            FilterArg::E => Filter::E,
            FilterArg::F => Filter::F,
            FilterArg::Q => Filter::Q,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compress {
            input,
            output,
            stages,
            filter,
            segments,
            target_size,
            aux_pool,
            workdir,
        } => compress(
            &input,
            &output,
            stages,
            filter,
            segments,
            target_size,
            aux_pool,
            workdir,
        ),
        Commands::Split { input, workdir } => split(&input, workdir),
        Commands::Info { input } => info(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn workdir_or_default(
    workdir: Option<PathBuf>,
    anchor: &PathBuf,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = match workdir {
        Some(d) => d,
        None => anchor
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(".icerflash-work"),
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[allow(clippy::too_many_arguments)]
fn compress(
    input: &PathBuf,
    output: &PathBuf,
    stages: u8,
    filter: FilterArg,
    segments: u8,
    target_size: usize,
    aux_pool: usize,
    workdir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = workdir_or_default(workdir, output)?;
    let storage = DiskStorage::new(&dir);

    // Stage the JPEG into the working namespace.
    let jpeg_name = "_input.jpg";
    fs::copy(input, dir.join(jpeg_name))?;

    let config = CompressionConfig {
        stages,
        filter: filter.into(),
        segments,
        target_size,
        aux_pool_bytes: aux_pool,
    };
    let run = compress_jpeg_to_icer(&storage, &config, jpeg_name, names::ICER_RESULT);
    let _ = fs::remove_file(dir.join(jpeg_name));
    let result = run?;

    fs::copy(dir.join(names::ICER_RESULT), output)?;
    let _ = fs::remove_file(dir.join(names::ICER_RESULT));

    println!(
        "✓ Compressed {}x{} image to {:?} ({} bytes)",
        result.width, result.height, output, result.compressed_size
    );
    Ok(())
}

fn split(input: &PathBuf, workdir: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let dir = workdir_or_default(workdir, input)?;
    let storage = DiskStorage::new(&dir);

    let jpeg_name = "_input.jpg";
    fs::copy(input, dir.join(jpeg_name))?;

    let (w, h) = jpeg_stream::decode_jpeg_to_rgb(&storage, jpeg_name, names::TEMP_RGB)?;
    yuv::split_rgb_to_yuv(
        &storage,
        names::TEMP_RGB,
        names::Y_CHANNEL,
        names::U_CHANNEL,
        names::V_CHANNEL,
        w as usize,
        h as usize,
    )?;
    let _ = fs::remove_file(dir.join(jpeg_name));

    println!("✓ Split {}x{} image into channel planes under {:?}", w, h, dir);
    println!(
        "  {} / {} / {} ({} bytes each)",
        names::Y_CHANNEL,
        names::U_CHANNEL,
        names::V_CHANNEL,
        w as usize * h as usize * 2
    );
    Ok(())
}

fn info(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    let mut offset = 0usize;
    let mut index = 0usize;
    while offset + HEADER_BYTES <= data.len() {
        let header = SegmentHeader::read_from(&data[offset..offset + HEADER_BYTES]);
        let payload_len = header.payload_bytes();
        let payload_ok = offset + HEADER_BYTES + payload_len <= data.len();
        let subband = match header.subband_type {
            0 => "LL",
            1 => "HL",
            2 => "LH",
            3 => "HH",
            _ => "??",
        };
        let chan = match header.channel_index() {
            0 => "Y",
            1 => "U",
            2 => "V",
            _ => "?",
        };
        let crc_status = if payload_ok {
            let payload = &data[offset + HEADER_BYTES..offset + HEADER_BYTES + payload_len];
            if icerflash_rs::icer::segment::payload_crc(payload) == header.data_crc32 {
                "ok"
            } else {
                "BAD"
            }
        } else {
            "truncated"
        };
        println!(
            "  segment {:3}: {} {} stage {} plane {:2} seg {:2}  {:6} bits  crc {}",
            index,
            chan,
            subband,
            header.decomp_level,
            header.bit_plane(),
            header.segment_number,
            header.data_length,
            crc_status
        );
        if !payload_ok {
            break;
        }
        offset += HEADER_BYTES + payload_len;
        index += 1;
    }
    println!();
    println!("{} segments", index);
    Ok(())
}
