//! Transparent handling of compressed images (xz, bzip2, gzip).
//!
//! A compressed image is unpacked next to the original, provisioned, and packed
//! back over the original in the same format only when the run succeeded.

use anyhow::Context;
use std::env;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const XZ_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];
const BZIP2_MAGIC: [u8; 3] = [b'B', b'Z', b'h'];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const MAGIC_LEN: u64 = XZ_MAGIC.len() as u64;

const XZ_PRESET_ENV: &str = "XZ_ENCODER_PRESET";
const XZ_DEFAULT_PRESET: u32 = 9;

/// Compression formats an image may come in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Xz,
    Bzip2,
    Gzip,
}

impl Compression {
    pub const ALL: [Compression; 3] = [Compression::Xz, Compression::Bzip2, Compression::Gzip];

    fn magic(self) -> &'static [u8] {
        match self {
            Compression::Xz => &XZ_MAGIC,
            Compression::Bzip2 => &BZIP2_MAGIC,
            Compression::Gzip => &GZIP_MAGIC,
        }
    }

    /// Conventional file name suffix, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Xz => "xz",
            Compression::Bzip2 => "bz2",
            Compression::Gzip => "gz",
        }
    }

    /// Format of the file at `path`, judged by its leading magic bytes.
    pub fn detect(path: &Path) -> io::Result<Option<Self>> {
        let mut header = Vec::with_capacity(MAGIC_LEN as usize);
        File::open(path)?.take(MAGIC_LEN).read_to_end(&mut header)?;
        Ok(Self::ALL
            .into_iter()
            .find(|format| header.starts_with(format.magic())))
    }

    fn decompress<R: Read, W: Write>(self, source: R, dest: &mut W) -> io::Result<u64> {
        let source = BufReader::new(source);
        match self {
            Compression::Xz => {
                io::copy(&mut xz2::read::XzDecoder::new_multi_decoder(source), dest)
            }
            Compression::Bzip2 => io::copy(&mut bzip2::read::MultiBzDecoder::new(source), dest),
            Compression::Gzip => io::copy(&mut flate2::read::MultiGzDecoder::new(source), dest),
        }
    }

    fn compress<R: Read, W: Write>(self, source: &mut R, dest: W) -> io::Result<u64> {
        match self {
            Compression::Xz => {
                let threads = std::thread::available_parallelism()
                    .map(|n| n.get() as u32)
                    .unwrap_or(1);
                let stream = xz2::stream::MtStreamBuilder::new()
                    .threads(threads)
                    .preset(encoder_preset())
                    .encoder()?;
                let mut encoder = xz2::write::XzEncoder::new_stream(dest, stream);
                let bytes = io::copy(source, &mut encoder)?;
                encoder.finish()?.flush()?;
                Ok(bytes)
            }
            Compression::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(dest, bzip2::Compression::best());
                let bytes = io::copy(source, &mut encoder)?;
                encoder.finish()?.flush()?;
                Ok(bytes)
            }
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(dest, flate2::Compression::best());
                let bytes = io::copy(source, &mut encoder)?;
                encoder.finish()?.flush()?;
                Ok(bytes)
            }
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Xz => f.write_str("xz"),
            Compression::Bzip2 => f.write_str("bzip2"),
            Compression::Gzip => f.write_str("gzip"),
        }
    }
}

/// xz preset from `XZ_ENCODER_PRESET`; anything outside 0..=9 falls back to 9.
pub fn preset_from(value: Option<&str>) -> u32 {
    value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|level| *level <= 9)
        .unwrap_or(XZ_DEFAULT_PRESET)
}

fn encoder_preset() -> u32 {
    let preset = preset_from(env::var(XZ_PRESET_ENV).ok().as_deref());
    log::debug!("using xz preset {}", preset);
    preset
}

/// The image file the pipeline actually attaches.
#[derive(Debug)]
pub struct WorkingImage {
    original: PathBuf,
    unpacked: Option<(Compression, NamedTempFile)>,
}

impl WorkingImage {
    pub fn prepare(image: &Path) -> anyhow::Result<Self> {
        let detected =
            Compression::detect(image).with_context(|| format!("read {}", image.display()))?;
        let Some(format) = detected else {
            return Ok(Self {
                original: image.to_path_buf(),
                unpacked: None,
            });
        };

        log::info!(
            "{} compressed image found, decompressing {}",
            format,
            image.display()
        );
        let mut unpacked = tempfile::Builder::new()
            .prefix(".wic-provision-")
            .suffix(".wic")
            .tempfile_in(parent_dir(image))
            .context("create temporary image file")?;

        let source = File::open(image).with_context(|| format!("open {}", image.display()))?;
        let bytes = format
            .decompress(source, unpacked.as_file_mut())
            .with_context(|| format!("decompress {}", image.display()))?;
        log::debug!(
            "decompressed {} bytes to {}",
            bytes,
            unpacked.path().display()
        );

        Ok(Self {
            original: image.to_path_buf(),
            unpacked: Some((format, unpacked)),
        })
    }

    pub fn path(&self) -> &Path {
        match &self.unpacked {
            Some((_, file)) => file.path(),
            None => &self.original,
        }
    }

    /// Format of the original image, `None` when it is not compressed.
    pub fn compression(&self) -> Option<Compression> {
        self.unpacked.as_ref().map(|(format, _)| *format)
    }

    /// Recompress over the original image. No-op for uncompressed images.
    ///
    /// Dropping a `WorkingImage` without finishing leaves the original untouched.
    pub fn finish(self) -> anyhow::Result<()> {
        let Some((format, unpacked)) = self.unpacked else {
            return Ok(());
        };

        log::info!("recompressing {} ({})", self.original.display(), format);
        let packed = NamedTempFile::new_in(parent_dir(&self.original))
            .context("create temporary compressed file")?;

        let mut source = BufReader::new(
            File::open(unpacked.path())
                .with_context(|| format!("open {}", unpacked.path().display()))?,
        );
        let bytes = format
            .compress(&mut source, BufWriter::new(packed.as_file()))
            .with_context(|| format!("{} compress image", format))?;
        log::debug!("compressed {} bytes", bytes);

        let perms = fs::metadata(&self.original)
            .with_context(|| format!("stat {}", self.original.display()))?
            .permissions();
        fs::set_permissions(packed.path(), perms)?;
        packed
            .persist(&self.original)
            .map_err(|e| e.error)
            .with_context(|| format!("replace {}", self.original.display()))?;

        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pack(format: Compression, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        format.compress(&mut &data[..], &mut out).unwrap();
        out
    }

    fn unpack(format: Compression, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        format.decompress(data, &mut out).unwrap();
        out
    }

    #[test]
    fn detects_formats_by_magic() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("image.wic");
        let tiny = dir.path().join("tiny");
        fs::write(&plain, b"not compressed at all").unwrap();
        fs::write(&tiny, b"\xFD7").unwrap();

        for format in Compression::ALL {
            let packed = dir.path().join(format!("image.wic.{}", format.extension()));
            fs::write(&packed, pack(format, b"disk")).unwrap();
            assert_eq!(Compression::detect(&packed).unwrap(), Some(format));
        }
        assert_eq!(Compression::detect(&plain).unwrap(), None);
        assert_eq!(Compression::detect(&tiny).unwrap(), None);
    }

    #[test]
    fn preset_parsing() {
        assert_eq!(preset_from(None), 9);
        assert_eq!(preset_from(Some("3")), 3);
        assert_eq!(preset_from(Some("0")), 0);
        assert_eq!(preset_from(Some("12")), 9);
        assert_eq!(preset_from(Some("fast")), 9);
    }

    #[test]
    fn plain_image_is_used_in_place() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("image.wic");
        fs::write(&image, b"raw disk").unwrap();

        let working = WorkingImage::prepare(&image).unwrap();

        assert_eq!(working.compression(), None);
        assert_eq!(working.path(), image.as_path());
        working.finish().unwrap();
        assert_eq!(fs::read(&image).unwrap(), b"raw disk");
    }

    fn assert_round_trips_changes(format: Compression) {
        let dir = tempdir().unwrap();
        let image = dir.path().join(format!("image.wic.{}", format.extension()));
        fs::write(&image, pack(format, b"original disk")).unwrap();

        let working = WorkingImage::prepare(&image).unwrap();
        assert_eq!(working.compression(), Some(format));
        assert_eq!(fs::read(working.path()).unwrap(), b"original disk");

        fs::write(working.path(), b"provisioned disk").unwrap();
        let unpacked = working.path().to_path_buf();
        working.finish().unwrap();

        assert!(!unpacked.exists());
        assert_eq!(Compression::detect(&image).unwrap(), Some(format));
        assert_eq!(unpack(format, &fs::read(&image).unwrap()), b"provisioned disk");
    }

    #[test]
    fn xz_image_round_trips_changes() {
        assert_round_trips_changes(Compression::Xz);
    }

    #[test]
    fn bzip2_image_round_trips_changes() {
        assert_round_trips_changes(Compression::Bzip2);
    }

    #[test]
    fn gzip_image_round_trips_changes() {
        assert_round_trips_changes(Compression::Gzip);
    }

    #[test]
    fn dropping_without_finish_keeps_original() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("image.wic.gz");
        let packed = pack(Compression::Gzip, b"original disk");
        fs::write(&image, &packed).unwrap();

        let working = WorkingImage::prepare(&image).unwrap();
        let unpacked = working.path().to_path_buf();
        fs::write(&unpacked, b"half-written").unwrap();
        drop(working);

        assert!(!unpacked.exists());
        assert_eq!(fs::read(&image).unwrap(), packed);
    }
}
