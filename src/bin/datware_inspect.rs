use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use datware::{
    plan_splits, CollectingSink, FileId, FormatHeader, PointFileInputFormat, PointFileWriter,
    PointRecord, ReaderConfig, SplitRange, TagInfo,
};

#[derive(Parser)]
#[command(name = "datware-inspect", version, about = "DatAware point file tooling")]
struct Cli {
    /// Reader configuration (JSON); defaults apply to missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the file header and tag dictionary
    Header { path: PathBuf },
    /// Print the records that start inside a byte range
    Dump {
        path: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: u64,
        /// Exclusive end offset; defaults to the file length
        #[arg(long)]
        end: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Read a file split by split and check the splits add up to the whole file
    Splits {
        path: PathBuf,
        #[arg(long = "split-size", default_value_t = 64 * 1024)]
        split_size: u64,
    },
    /// Write a synthetic point file
    Generate {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = Version::V2)]
        version: Version,
        #[arg(long, default_value_t = 10_000)]
        records: u64,
        #[arg(long, default_value_t = 8)]
        tags: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Version {
    V1,
    V2,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ReaderConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ReaderConfig::default(),
    };
    let mut out = io::BufWriter::new(io::stdout());
    match cli.command {
        Commands::Header { path } => cmd_header(&path, config, &mut out)?,
        Commands::Dump {
            path,
            start,
            end,
            limit,
        } => cmd_dump(&path, config, start, end, limit, &mut out)?,
        Commands::Splits { path, split_size } => cmd_splits(&path, config, split_size, &mut out)?,
        Commands::Generate {
            path,
            version,
            records,
            tags,
        } => cmd_generate(&path, version, records, tags)?,
    }
    out.flush()?;
    Ok(())
}

fn file_len(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len())
}

fn cmd_header(path: &Path, config: ReaderConfig, out: &mut dyn Write) -> Result<()> {
    let format = PointFileInputFormat::new(config)?;
    let split = SplitRange::new(path, 0, file_len(path)?);
    let mut reader = format.open_reader_for_split(&split)?;
    let Some(header) = reader.header() else {
        bail!("reader opened without a header");
    };
    writeln!(out, "version: {}", header.version.as_byte())?;
    writeln!(out, "layout: {:?}", header.layout)?;
    writeln!(out, "header_len: {}", header.header_len)?;
    writeln!(out, "file_len: {}", split.end)?;
    for tag in header.tags.iter() {
        writeln!(
            out,
            "tag {:>6} {:<32} scale={} offset={}",
            tag.tag_id, tag.name, tag.scale, tag.offset
        )?;
    }
    reader.close();
    Ok(())
}

fn cmd_dump(
    path: &Path,
    config: ReaderConfig,
    start: u64,
    end: Option<u64>,
    limit: Option<usize>,
    out: &mut dyn Write,
) -> Result<()> {
    let format = PointFileInputFormat::new(config)?;
    let end = match end {
        Some(end) => end,
        None => file_len(path)?,
    };
    let split = SplitRange::new(path, start, end);
    let reader = format.open_reader_for_split(&split)?;
    for record in reader.take(limit.unwrap_or(usize::MAX)) {
        let record = record?;
        writeln!(
            out,
            "{} tag={} quality={:#06x} value={}",
            record.timestamp_millis, record.tag_id, record.quality_flags, record.value
        )?;
    }
    Ok(())
}

fn cmd_splits(
    path: &Path,
    config: ReaderConfig,
    split_size: u64,
    out: &mut dyn Write,
) -> Result<()> {
    if split_size == 0 {
        bail!("split size must be positive");
    }
    let sink = CollectingSink::new();
    let format = PointFileInputFormat::new(config)?.with_sink(sink.clone());
    let file = FileId::from(path);
    let len = file_len(path)?;

    let mut whole = format.open_reader_for_split(&SplitRange::new(file.clone(), 0, len))?;
    let mut expected = 0u64;
    while whole.next_record()?.is_some() {
        expected += 1;
    }
    let expected_corrupt = whole.stats().corrupt_records;
    whole.close();

    let mut total = 0u64;
    let mut corrupt = 0u64;
    for split in plan_splits(file, len, split_size) {
        let mut reader = format.open_reader_for_split(&split)?;
        let mut records = 0u64;
        for next in reader.by_ref() {
            next?;
            records += 1;
        }
        let stats = reader.stats();
        writeln!(
            out,
            "{split}: {records} records, {} corrupt",
            stats.corrupt_records
        )?;
        total += records;
        corrupt += stats.corrupt_records;
    }
    writeln!(out, "total: {total} records, {corrupt} corrupt")?;
    if total != expected || corrupt != expected_corrupt {
        bail!(
            "split partition mismatch: {total} records / {corrupt} corrupt, whole file has {expected} / {expected_corrupt}"
        );
    }
    log::info!("{} diagnostics reported", sink.diagnostics().len());
    Ok(())
}

fn cmd_generate(path: &Path, version: Version, records: u64, tags: u32) -> Result<()> {
    if tags == 0 {
        bail!("at least one tag is required");
    }
    let header = match version {
        Version::V1 => FormatHeader::fixed(16)?,
        Version::V2 => FormatHeader::variable(
            (0..tags)
                .map(|i| TagInfo::new(i, format!("PMU{i}:FREQ"), 0.001, 60.0))
                .collect(),
        )?,
    };
    let base_millis = 1_700_000_000_000i64;
    let mut writer = PointFileWriter::create(path, header)?;
    for i in 0..records {
        let tag_id = (i % tags as u64) as u32;
        // Wide deviations for some records so v2 files mix value widths.
        let deviation = match i % 7 {
            0 => 40_000.0,
            3 => -250.0,
            _ => (i % 100) as f64 * 0.5,
        };
        let (quality, value) = match version {
            Version::V1 => (0, deviation),
            Version::V2 => (192, 60.0 + deviation * 0.001),
        };
        writer.append(&PointRecord::new(
            base_millis + i as i64 * 20,
            tag_id,
            quality,
            value,
        ))?;
    }
    let written = writer.records();
    writer.finish()?;
    log::info!("wrote {written} records to {}", path.display());
    Ok(())
}
