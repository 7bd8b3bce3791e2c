use super::{
    Error, FileHeader, FrameType, Result, DCAF_MAGIC, DCAF_PREFIX_SIZE, DCTX_MAGIC, DTEX_MAGIC,
    HEADER_SIZE, PVRT_MAGIC,
};
use crate::codec::FrameCodec;
use crate::common::{copy_buffered, WriteSeek, WriteStructExt, BUFFER_SIZE};
use byteorder::{WriteBytesExt, LE};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, trace};

/// Safety cap on frame discovery so a pattern with no hole cannot probe forever.
const MAX_FRAMES: u32 = 10000;

/// A printf-style filename template with a single integer hole (`%d` or `%0Nd`; `%%` escapes a
/// literal percent sign).
#[derive(Debug, Clone)]
pub struct FramePattern {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl FramePattern {
    /// Parses `pattern`, rejecting anything other than exactly one integer hole.
    pub fn new(pattern: &str) -> Result<Self> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut hole: Option<(usize, bool)> = None;
        let mut chars = pattern.chars().peekable();
        while let Some(ch) = chars.next() {
            let literal = if hole.is_none() { &mut prefix } else { &mut suffix };
            if ch != '%' {
                literal.push(ch);
                continue;
            }
            if chars.peek() == Some(&'%') {
                chars.next();
                literal.push('%');
                continue;
            }
            if hole.is_some() {
                return Err(Error::InvalidPattern(pattern.to_owned()));
            }
            let zero_pad = if chars.peek() == Some(&'0') {
                chars.next();
                true
            } else {
                false
            };
            let mut width = 0usize;
            while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                chars.next();
                width = width * 10 + digit as usize;
            }
            if chars.next() != Some('d') {
                return Err(Error::InvalidPattern(pattern.to_owned()));
            }
            hole = Some((width, zero_pad));
        }
        match hole {
            Some((width, zero_pad)) => Ok(Self { prefix, suffix, width, zero_pad }),
            None => Err(Error::InvalidPattern(pattern.to_owned())),
        }
    }

    /// Expands the pattern with `index` substituted into the hole.
    pub fn format(&self, index: u32) -> PathBuf {
        let formatted = if self.zero_pad {
            format!("{}{:0width$}{}", self.prefix, index, self.suffix, width = self.width)
        } else {
            format!("{}{:width$}{}", self.prefix, index, self.suffix, width = self.width)
        };
        PathBuf::from(formatted)
    }
}

/// Returns the number of bytes of tool header to strip from the front of each frame file.
/// `first_frame` is the complete content of frame 0.
pub fn texture_skip(first_frame: &[u8], frame_type: FrameType) -> Result<usize> {
    if first_frame.len() >= 10
        && frame_type == FrameType::Paletted
        && first_frame[..4] == DCTX_MAGIC
    {
        return Ok((first_frame[9] as usize + 1) * 32);
    }
    if first_frame.len() >= 4
        && (first_frame[..4] == DTEX_MAGIC || first_frame[..4] == PVRT_MAGIC)
    {
        return Ok(0x10);
    }
    if frame_type == FrameType::Macroblock {
        return Ok(0);
    }
    Err(Error::UnknownTextureFormat)
}

/// Stream parameters for a pack run. Everything except the frame inventory and the audio payload.
#[derive(Debug, Copy, Clone)]
pub struct PackSettings {
    pub frame_type: FrameType,
    pub width: u16,
    pub height: u16,
    pub frame_rate: f32,
    pub sample_rate: u16,
    pub channels: u16,
}

/// Summary of a finished pack run.
#[derive(Debug, Copy, Clone, Default)]
pub struct PackStats {
    pub num_frames: u32,
    pub frame_size: u32,
    pub max_compressed_size: u32,
    pub audio_bytes: u64,
    pub total_bytes: u64,
}

/// Builds a DCMV container from pre-encoded texture frames and a raw ADPCM stream.
pub struct Packer<'c> {
    settings: PackSettings,
    codec: &'c dyn FrameCodec,
}

impl<'c> Packer<'c> {
    pub fn new(settings: PackSettings, codec: &'c dyn FrameCodec) -> Self {
        Self { settings, codec }
    }

    /// Packs the frames matched by `pattern` plus the audio file at `audio_path` into a new
    /// container at `output`. Any error aborts the pack; a partial output file may be left
    /// behind for the caller to discard.
    #[instrument(level = "debug", skip(self))]
    pub fn pack(
        &self,
        output: &Path,
        pattern: &FramePattern,
        audio_path: &Path,
    ) -> Result<PackStats> {
        let mut audio = File::open(audio_path)?;
        skip_audio_prefix(&mut audio)?;

        let num_frames = discover_frames(pattern)?;
        debug!("Discovered {} frames", num_frames);

        let first_frame = fs::read(pattern.format(0))?;
        let skip = texture_skip(&first_frame, self.settings.frame_type)?;
        if skip >= first_frame.len() {
            return Err(Error::TruncatedTexture);
        }
        let frame_size = (first_frame.len() - skip) as u32;
        debug!("Frame payload is {:#x} bytes after stripping a {:#x}-byte header", frame_size, skip);

        let mut out = File::create(output)?;
        let stats =
            self.pack_into(&mut out, num_frames, frame_size, skip, pattern, &mut audio)?;
        info!(
            "Packed {} frames + {} audio bytes into {} ({} bytes, max compressed frame {:#x})",
            stats.num_frames,
            stats.audio_bytes,
            output.display(),
            stats.total_bytes,
            stats.max_compressed_size,
        );
        Ok(stats)
    }

    fn pack_into(
        &self,
        out: &mut (impl WriteSeek + ?Sized),
        num_frames: u32,
        frame_size: u32,
        skip: usize,
        pattern: &FramePattern,
        audio: &mut (impl Read + ?Sized),
    ) -> Result<PackStats> {
        // Reserve the header and offset table, then come back for them once the layout is known.
        let table_size = u64::from(num_frames + 1) * 4;
        out.seek(SeekFrom::Start(HEADER_SIZE + table_size))?;

        let mut offsets = vec![0u32; num_frames as usize + 1];
        let mut max_compressed_size = 0u32;
        let expected_len = u64::from(frame_size) + skip as u64;
        for i in 0..num_frames {
            let raw = fs::read(pattern.format(i))?;
            if raw.len() as u64 != expected_len {
                return Err(Error::FrameSizeMismatch {
                    frame: i,
                    len: raw.len() as u64,
                    expected: expected_len,
                });
            }
            let compressed = self.codec.compress(&raw[skip..])?;
            offsets[i as usize] = position(out)?;
            out.write_all(&compressed)?;
            max_compressed_size = max_compressed_size.max(compressed.len() as u32);
            trace!(
                "frame {:04}: {:#x} -> {:#x} bytes at {:#x}",
                i,
                frame_size,
                compressed.len(),
                offsets[i as usize],
            );
        }

        let audio_offset = position(out)?;
        offsets[num_frames as usize] = audio_offset;

        out.seek(SeekFrom::Start(HEADER_SIZE))?;
        for offset in &offsets {
            out.write_u32::<LE>(*offset)?;
        }

        out.seek(SeekFrom::End(0))?;
        let mut buf = vec![0u8; BUFFER_SIZE];
        let audio_bytes = copy_buffered(audio, out, &mut buf)?;
        let total_bytes = out.stream_position()?;

        let header = FileHeader {
            frame_type: self.settings.frame_type,
            width: self.settings.width,
            height: self.settings.height,
            frame_rate: self.settings.frame_rate,
            sample_rate: self.settings.sample_rate,
            channels: self.settings.channels,
            num_frames,
            frame_size,
            max_compressed_size,
            audio_offset,
        };
        out.seek(SeekFrom::Start(0))?;
        out.write_struct(&header)?;
        out.flush()?;

        Ok(PackStats {
            num_frames,
            frame_size,
            max_compressed_size,
            audio_bytes,
            total_bytes,
        })
    }
}

/// Consumes the optional 64-byte `DcAF` tool prefix, leaving `audio` positioned at the start of
/// the raw ADPCM payload.
fn skip_audio_prefix(audio: &mut (impl Read + Seek + ?Sized)) -> Result<()> {
    let mut head = [0u8; 4];
    let pos = match audio.read_exact(&mut head) {
        Ok(()) if head == DCAF_MAGIC => {
            debug!("Skipping {}-byte DcAF prefix", DCAF_PREFIX_SIZE);
            DCAF_PREFIX_SIZE
        }
        // Streams shorter than the probe are legal; they are raw ADPCM from byte 0.
        _ => 0,
    };
    audio.seek(SeekFrom::Start(pos))?;
    Ok(())
}

/// Probes `pattern` for consecutive frame files starting at index 0 and returns how many exist.
fn discover_frames(pattern: &FramePattern) -> Result<u32> {
    let mut count = 0;
    while count < MAX_FRAMES && pattern.format(count).is_file() {
        count += 1;
    }
    if count == 0 {
        return Err(Error::NoFrames);
    }
    Ok(count)
}

fn position(out: &mut (impl Seek + ?Sized)) -> Result<u32> {
    let pos = out.stream_position()?;
    u32::try_from(pos).map_err(|_| Error::OffsetOverflow)
}
