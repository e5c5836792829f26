//! BIN/IMG/MDF/NRG to ISO conversion.
//!
//! Raw CD images store 2352-byte sectors (2448 with subchannel data) that
//! start with a 12-byte sync pattern; only the 2048 bytes of user data per
//! sector belong in the ISO. Cooked images already hold 2048-byte sectors and
//! are copied through. Nero images end with a footer pointing at the chunk
//! table, which bounds the sector data.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use thiserror::Error;

use super::{ExtensionMatcher, part_path, remove_part};
use crate::engine::{BatchReport, BatchRunner, Cancelled, ItemContext, ItemOutcome};

pub const SYNC_PATTERN: [u8; 12] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
pub const RAW_SECTOR_SIZE: usize = 2352;
pub const RAW_SUBCHANNEL_SECTOR_SIZE: usize = 2448;
pub const USER_DATA_SIZE: usize = 2048;

const MODE_BYTE_OFFSET: usize = 15;
const MODE1_DATA_OFFSET: usize = 16;
const MODE2_DATA_OFFSET: usize = 24;
const BATCH_SECTORS: usize = 64;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unsupported sector mode {0}")]
    UnsupportedMode(u8),
    #[error("{}: no sector data", .0.display())]
    Empty(PathBuf),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ConvertError + '_ {
    move |source| ConvertError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How user data is laid out in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorLayout {
    Cooked,
    Raw { sector_size: usize, data_offset: usize },
}

impl SectorLayout {
    fn sector_size(&self) -> usize {
        match self {
            SectorLayout::Cooked => USER_DATA_SIZE,
            SectorLayout::Raw { sector_size, .. } => *sector_size,
        }
    }
}

/// Inspect the first bytes of the sector data.
pub fn detect_layout(header: &[u8]) -> Result<SectorLayout, ConvertError> {
    if !header.starts_with(&SYNC_PATTERN) {
        return Ok(SectorLayout::Cooked);
    }

    let sector_size = if header
        .get(RAW_SUBCHANNEL_SECTOR_SIZE..)
        .is_some_and(|rest| rest.starts_with(&SYNC_PATTERN))
    {
        RAW_SUBCHANNEL_SECTOR_SIZE
    } else {
        RAW_SECTOR_SIZE
    };

    let data_offset = match header.get(MODE_BYTE_OFFSET).copied() {
        Some(1) => MODE1_DATA_OFFSET,
        Some(2) => MODE2_DATA_OFFSET,
        Some(mode) => return Err(ConvertError::UnsupportedMode(mode)),
        None => return Ok(SectorLayout::Cooked),
    };

    Ok(SectorLayout::Raw {
        sector_size,
        data_offset,
    })
}

/// End of the sector data in a Nero image, read from its footer.
///
/// `NER5` images store a 64-bit chunk offset in the last 8 bytes; older
/// `NERO` images store a 32-bit offset in the last 4.
pub fn nrg_data_end(footer: &[u8], file_len: u64) -> Option<u64> {
    if footer.len() < 12 {
        return None;
    }
    let tail = &footer[footer.len() - 12..];

    let offset = if &tail[0..4] == b"NER5" {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&tail[4..12]);
        u64::from_be_bytes(raw)
    } else if &tail[4..8] == b"NERO" {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&tail[8..12]);
        u64::from(u32::from_be_bytes(raw))
    } else {
        return None;
    };

    (offset > 0 && offset <= file_len).then_some(offset)
}

/// `<stem>.iso` next to the input, or inside `output_dir`.
pub fn output_path(input: &Path, output_dir: Option<&Path>) -> Option<PathBuf> {
    let stem = input.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".iso");
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Some(dir.join(name))
}

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub extensions: Vec<String>,
    pub output_dir: Option<PathBuf>,
    /// Sectors between two cancellation checks
    pub cancel_poll_sectors: u64,
}

/// Convert `input` into `output`, staging through `<output>.part`.
///
/// The part file is removed on failure or cancellation, so `output` either
/// does not exist or is complete. A part file left by an interrupted earlier
/// run is truncated and rewritten. Returns the number of sectors written.
pub fn convert_image(
    input: &Path,
    output: &Path,
    poll_sectors: u64,
    ctx: &ItemContext<'_>,
) -> Result<u64, ConvertError> {
    ctx.check()?;
    let part = part_path(output);
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&part)
        .map_err(io_error(&part))?;

    let result = write_sectors(input, file, &part, poll_sectors.max(1), ctx)
        .and_then(|sectors| fs::rename(&part, output).map(|_| sectors).map_err(io_error(output)));

    if result.is_err() {
        remove_part(&part);
    }
    result
}

fn write_sectors(
    input: &Path,
    part_file: File,
    part: &Path,
    poll_sectors: u64,
    ctx: &ItemContext<'_>,
) -> Result<u64, ConvertError> {
    let mut reader = File::open(input).map_err(io_error(input))?;
    let file_len = reader.metadata().map_err(io_error(input))?.len();

    let is_nrg = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("nrg"));
    let data_end = if is_nrg {
        read_nrg_end(&mut reader, file_len).map_err(io_error(input))?
    } else {
        file_len
    };
    if data_end == 0 {
        return Err(ConvertError::Empty(input.to_path_buf()));
    }

    let mut header = vec![0u8; RAW_SUBCHANNEL_SECTOR_SIZE + SYNC_PATTERN.len()];
    reader.seek(SeekFrom::Start(0)).map_err(io_error(input))?;
    let header_len = read_full(&mut (&mut reader).take(data_end), &mut header).map_err(io_error(input))?;
    let layout = detect_layout(&header[..header_len])?;
    tracing::debug!("{}: {:?}, {} data bytes", input.display(), layout, data_end);

    reader.seek(SeekFrom::Start(0)).map_err(io_error(input))?;
    let mut reader = reader.take(data_end);
    let mut writer = BufWriter::new(part_file);

    let sector_size = layout.sector_size();
    let mut buffer = vec![0u8; BATCH_SECTORS * sector_size];
    let mut user_data = Vec::with_capacity(BATCH_SECTORS * USER_DATA_SIZE);
    let mut sectors = 0u64;
    let mut since_poll = 0u64;

    loop {
        let filled = read_full(&mut reader, &mut buffer).map_err(io_error(input))?;
        if filled == 0 {
            break;
        }

        let whole = filled / sector_size;
        match layout {
            SectorLayout::Cooked => writer.write_all(&buffer[..filled]).map_err(io_error(part))?,
            SectorLayout::Raw { data_offset, .. } => {
                user_data.clear();
                for sector in buffer[..whole * sector_size].chunks_exact(sector_size) {
                    user_data.extend_from_slice(&sector[data_offset..data_offset + USER_DATA_SIZE]);
                }
                writer.write_all(&user_data).map_err(io_error(part))?;
            }
        }

        ctx.add_bytes(filled as u64);
        sectors += whole as u64;
        since_poll += whole as u64;
        if since_poll >= poll_sectors {
            since_poll = 0;
            ctx.check()?;
        }

        if filled < buffer.len() {
            break;
        }
    }

    if sectors == 0 && matches!(layout, SectorLayout::Raw { .. }) {
        return Err(ConvertError::Empty(input.to_path_buf()));
    }

    writer.flush().map_err(io_error(part))?;
    ctx.check()?;
    Ok(sectors)
}

fn read_nrg_end(reader: &mut File, file_len: u64) -> io::Result<u64> {
    if file_len < 12 {
        return Ok(file_len);
    }
    let mut footer = [0u8; 12];
    reader.seek(SeekFrom::End(-12))?;
    reader.read_exact(&mut footer)?;
    Ok(nrg_data_end(&footer, file_len).unwrap_or(file_len))
}

/// Fill `buf` until it is full or the reader is exhausted.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Convert every input; inputs sharing an output path run in one task.
pub fn convert(runner: &BatchRunner, inputs: Vec<PathBuf>, options: &ConvertOptions) -> Result<BatchReport> {
    let matcher = ExtensionMatcher::new(options.extensions.as_slice())?;
    let total_bytes: u64 = inputs
        .iter()
        .filter(|path| matcher.matches(path))
        .filter_map(|path| fs::metadata(path).ok())
        .map(|meta| meta.len())
        .sum();

    let key_dir = options.output_dir.clone();
    let options = options.clone();

    let report = runner.run_with_destinations(
        "Converting",
        inputs,
        total_bytes,
        move |input| output_path(input, key_dir.as_deref()),
        move |input, ctx| convert_one(input, &matcher, &options, ctx),
    )?;
    Ok(report)
}

fn convert_one(input: &Path, matcher: &ExtensionMatcher, options: &ConvertOptions, ctx: &ItemContext<'_>) -> ItemOutcome {
    if !matcher.matches(input) {
        return ItemOutcome::Skipped(format!("{}: not a convertible image", input.display()));
    }
    let output_dir = options.output_dir.as_deref();
    let Some(output) = output_path(input, output_dir) else {
        return ItemOutcome::Failed(format!("{}: no file name", input.display()));
    };
    if output.exists() {
        return ItemOutcome::Skipped(format!("{}: already exists", output.display()));
    }
    if let Some(dir) = output_dir {
        if let Err(e) = fs::create_dir_all(dir) {
            return ItemOutcome::Failed(format!("{}: {}", dir.display(), e));
        }
    }

    match convert_image(input, &output, options.cancel_poll_sectors, ctx) {
        Ok(sectors) => ItemOutcome::Completed(format!(
            "{} -> {} ({} sectors)",
            input.display(),
            output.display(),
            sectors
        )),
        Err(ConvertError::Cancelled(_)) => ItemOutcome::Cancelled(format!("{}: cancelled", input.display())),
        Err(e) => ItemOutcome::Failed(format!("{}: {}", input.display(), e)),
    }
}

/// Build a raw image of `sectors` sectors for tests and demos.
///
/// User data of sector `n` is filled with the byte `n as u8`.
pub fn synthesize_raw_image(sectors: usize, sector_size: usize, mode: u8) -> Vec<u8> {
    let data_offset = if mode == 2 { MODE2_DATA_OFFSET } else { MODE1_DATA_OFFSET };
    let mut image = Vec::with_capacity(sectors * sector_size);
    for n in 0..sectors {
        let mut sector = vec![0u8; sector_size];
        sector[..SYNC_PATTERN.len()].copy_from_slice(&SYNC_PATTERN);
        sector[MODE_BYTE_OFFSET] = mode;
        sector[data_offset..data_offset + USER_DATA_SIZE].fill(n as u8);
        image.extend_from_slice(&sector);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BatchSettings, CancellationToken, ProgressOptions, ProgressState};
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner() -> BatchRunner {
        BatchRunner::new(
            BatchSettings {
                max_threads: 3,
                max_chunk_size: 2,
                progress: ProgressOptions {
                    interval: Duration::from_millis(10),
                    visible: false,
                },
            },
            CancellationToken::new(),
        )
    }

    fn options(output_dir: Option<PathBuf>) -> ConvertOptions {
        ConvertOptions {
            extensions: ["bin", "img", "mdf", "nrg"].iter().map(|e| e.to_string()).collect(),
            output_dir,
            cancel_poll_sectors: 4,
        }
    }

    fn expected_iso(sectors: usize) -> Vec<u8> {
        (0..sectors).flat_map(|n| vec![n as u8; USER_DATA_SIZE]).collect()
    }

    #[test]
    fn test_detect_layout() {
        let mode1 = synthesize_raw_image(2, RAW_SECTOR_SIZE, 1);
        assert_eq!(
            detect_layout(&mode1).unwrap(),
            SectorLayout::Raw {
                sector_size: 2352,
                data_offset: 16
            }
        );

        let mode2 = synthesize_raw_image(2, RAW_SUBCHANNEL_SECTOR_SIZE, 2);
        assert_eq!(
            detect_layout(&mode2).unwrap(),
            SectorLayout::Raw {
                sector_size: 2448,
                data_offset: 24
            }
        );

        assert_eq!(detect_layout(&[0u8; 4096]).unwrap(), SectorLayout::Cooked);
        assert_eq!(detect_layout(&[]).unwrap(), SectorLayout::Cooked);

        let mut odd = synthesize_raw_image(1, RAW_SECTOR_SIZE, 1);
        odd[MODE_BYTE_OFFSET] = 7;
        assert!(matches!(detect_layout(&odd), Err(ConvertError::UnsupportedMode(7))));
    }

    #[test]
    fn test_nrg_footer() {
        let mut ner5 = vec![0u8; 12];
        ner5[0..4].copy_from_slice(b"NER5");
        ner5[4..12].copy_from_slice(&4096u64.to_be_bytes());
        assert_eq!(nrg_data_end(&ner5, 10_000), Some(4096));

        let mut nero = vec![0u8; 12];
        nero[4..8].copy_from_slice(b"NERO");
        nero[8..12].copy_from_slice(&2048u32.to_be_bytes());
        assert_eq!(nrg_data_end(&nero, 10_000), Some(2048));

        assert_eq!(nrg_data_end(&ner5, 100), None);
        assert_eq!(nrg_data_end(&[0u8; 12], 100), None);
        assert_eq!(nrg_data_end(&[0u8; 4], 100), None);
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path(Path::new("/games/disc.bin"), None),
            Some(PathBuf::from("/games/disc.iso"))
        );
        assert_eq!(
            output_path(Path::new("/games/disc.mdf"), Some(Path::new("/out"))),
            Some(PathBuf::from("/out/disc.iso"))
        );
    }

    #[test]
    fn test_convert_raw_and_cooked_images() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("mode1.bin");
        let mdf = dir.path().join("sub.mdf");
        let img = dir.path().join("cooked.img");
        fs::write(&bin, synthesize_raw_image(10, RAW_SECTOR_SIZE, 1)).unwrap();
        fs::write(&mdf, synthesize_raw_image(5, RAW_SUBCHANNEL_SECTOR_SIZE, 2)).unwrap();
        fs::write(&img, expected_iso(3)).unwrap();

        let report = convert(&runner(), vec![bin, mdf, img], &options(None)).unwrap();

        assert_eq!(report.outcomes.completed.len(), 3, "{:?}", report.outcomes);
        assert_eq!(fs::read(dir.path().join("mode1.iso")).unwrap(), expected_iso(10));
        assert_eq!(fs::read(dir.path().join("sub.iso")).unwrap(), expected_iso(5));
        assert_eq!(fs::read(dir.path().join("cooked.iso")).unwrap(), expected_iso(3));
        assert_eq!(report.progress.completed_bytes, report.progress.total_bytes);
    }

    #[test]
    fn test_convert_nrg_stops_at_footer() {
        let dir = TempDir::new().unwrap();
        let nrg = dir.path().join("nero.nrg");
        let mut image = synthesize_raw_image(4, RAW_SECTOR_SIZE, 1);
        let data_end = image.len() as u64;
        image.extend_from_slice(b"CUEXjunkjunkjunk");
        image.extend_from_slice(b"NER5");
        image.extend_from_slice(&data_end.to_be_bytes());
        fs::write(&nrg, image).unwrap();

        let out = dir.path().join("out");
        let report = convert(&runner(), vec![nrg], &options(Some(out.clone()))).unwrap();
        assert_eq!(report.outcomes.completed.len(), 1, "{:?}", report.outcomes);
        assert_eq!(fs::read(out.join("nero.iso")).unwrap(), expected_iso(4));
    }

    #[test]
    fn test_existing_output_and_foreign_extension_are_skipped() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("disc.bin");
        fs::write(&bin, synthesize_raw_image(1, RAW_SECTOR_SIZE, 1)).unwrap();
        fs::write(dir.path().join("disc.iso"), b"already here").unwrap();
        let txt = dir.path().join("notes.txt");
        fs::write(&txt, b"hello").unwrap();

        let report = convert(&runner(), vec![bin, txt], &options(None)).unwrap();
        assert_eq!(report.outcomes.skipped.len(), 2);
        assert_eq!(fs::read(dir.path().join("disc.iso")).unwrap(), b"already here");
    }

    #[test]
    fn test_colliding_outputs_convert_once() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("disc.bin");
        let img = dir.path().join("disc.img");
        fs::write(&bin, synthesize_raw_image(2, RAW_SECTOR_SIZE, 1)).unwrap();
        fs::write(&img, expected_iso(1)).unwrap();

        let report = convert(&runner(), vec![bin, img], &options(None)).unwrap();
        assert_eq!(report.outcomes.completed.len(), 1);
        assert_eq!(report.outcomes.skipped.len(), 1);
        assert_eq!(fs::read(dir.path().join("disc.iso")).unwrap(), expected_iso(2));
    }

    #[test]
    fn test_cancel_before_start_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("disc.bin");
        fs::write(&bin, synthesize_raw_image(8, RAW_SECTOR_SIZE, 1)).unwrap();
        let output = dir.path().join("disc.iso");

        let token = CancellationToken::new();
        token.set();
        let progress = ProgressState::new(0, 1);
        let ctx = ItemContext::new(&token, &progress);

        let result = convert_image(&bin, &output, 1, &ctx);
        assert!(matches!(result, Err(ConvertError::Cancelled(_))));
        assert!(!output.exists());
        assert!(!part_path(&output).exists());
    }

    #[test]
    fn test_cancel_mid_write_removes_part_file() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("disc.bin");
        let image = synthesize_raw_image(BATCH_SECTORS * 4, RAW_SECTOR_SIZE, 1);
        let image_len = image.len() as u64;
        fs::write(&bin, image).unwrap();
        let output = dir.path().join("disc.iso");

        // The token flips once the first batch of sectors has been written.
        let token = CancellationToken::new();
        let progress = ProgressState::new(image_len, 1);
        let ctx = ItemContext::cancelling_after(&token, &progress, 1);

        let result = convert_image(&bin, &output, 1, &ctx);
        assert!(matches!(result, Err(ConvertError::Cancelled(_))), "{result:?}");
        assert!(token.is_set());

        let written = progress.snapshot().completed_bytes;
        assert_eq!(written, (BATCH_SECTORS * RAW_SECTOR_SIZE) as u64);
        assert!(written < image_len);
        assert!(!output.exists());
        assert!(!part_path(&output).exists());
    }

    #[test]
    fn test_mid_write_cancel_is_reported_as_cancelled() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("disc.bin");
        fs::write(&bin, synthesize_raw_image(BATCH_SECTORS * 2, RAW_SECTOR_SIZE, 1)).unwrap();

        let token = CancellationToken::new();
        let progress = ProgressState::new(0, 1);
        let ctx = ItemContext::cancelling_after(&token, &progress, 1);
        let opts = options(None);
        let matcher = ExtensionMatcher::new(opts.extensions.as_slice()).unwrap();

        let outcome = convert_one(&bin, &matcher, &opts, &ctx);
        assert!(matches!(outcome, ItemOutcome::Cancelled(_)), "{outcome:?}");
        assert!(!dir.path().join("disc.iso").exists());
        assert!(!dir.path().join("disc.iso.part").exists());
    }

    #[test]
    fn test_stale_part_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("disc.bin");
        fs::write(&bin, synthesize_raw_image(3, RAW_SECTOR_SIZE, 1)).unwrap();
        let stale = part_path(&dir.path().join("disc.iso"));
        fs::write(&stale, vec![0xEEu8; 3 * USER_DATA_SIZE + 100]).unwrap();

        let report = convert(&runner(), vec![bin], &options(None)).unwrap();

        assert_eq!(report.outcomes.counts.completed, 1, "{:?}", report.outcomes);
        assert_eq!(fs::read(dir.path().join("disc.iso")).unwrap(), expected_iso(3));
        assert!(!stale.exists());
    }

    #[test]
    fn test_truncated_raw_image_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("short.bin");
        let mut data = synthesize_raw_image(1, RAW_SECTOR_SIZE, 1);
        data.truncate(100);
        fs::write(&bin, data).unwrap();

        let report = convert(&runner(), vec![bin], &options(None)).unwrap();
        assert_eq!(report.outcomes.failed.len(), 1);
        assert!(!dir.path().join("short.iso").exists());
        assert!(!dir.path().join("short.iso.part").exists());
    }
}
