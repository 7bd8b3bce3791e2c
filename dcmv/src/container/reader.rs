use super::{FileHeader, Result};
use crate::common::{ReadSeek, ReadStructExt};
use byteorder::{ReadBytesExt, LE};
use std::fs::File;
use std::path::Path;
use tracing::{debug, instrument};

/// Parses a DCMV container and resolves per-frame byte ranges.
///
/// The reader consumes the header and offset table once and then holds no stream; callers keep
/// their own handles into the file. Playback uses two independent handles on the same container,
/// one for the video region and one for the audio region, so the decode worker and the audio
/// callback never contend on a cursor.
#[derive(Debug, Clone)]
pub struct ContainerReader {
    header: FileHeader,
    /// `num_frames + 1` absolute file positions. The final entry equals `audio_offset`.
    offsets: Vec<u32>,
}

impl ContainerReader {
    /// Reads the header and offset table from `reader`, which must be positioned at the start of
    /// the container.
    #[instrument(level = "trace", skip_all)]
    pub fn new(reader: &mut (impl ReadSeek + ?Sized)) -> Result<Self> {
        let header: FileHeader = reader.read_struct()?;
        let num_offsets = header.num_frames as usize + 1;
        let mut offsets = vec![0u32; num_offsets];
        reader.read_u32_into::<LE>(&mut offsets)?;
        debug!(
            "Loaded container: {:?} {}x{} @ {} fps, {} Hz, {} ch, {} frames, frame_size={:#x}",
            header.frame_type,
            header.width,
            header.height,
            header.frame_rate,
            header.sample_rate,
            header.channels,
            header.num_frames,
            header.frame_size,
        );
        Ok(Self { header, offsets })
    }

    /// Opens the container at `path` and returns the parsed reader along with two independent
    /// file handles, one for the video region and one for the audio region.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, File, File)> {
        let path = path.as_ref();
        let mut video = File::open(path)?;
        let reader = Self::new(&mut video)?;
        let audio = File::open(path)?;
        Ok((reader, video, audio))
    }

    /// Returns the container header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Returns the number of video frames.
    pub fn num_frames(&self) -> u32 {
        self.header.num_frames
    }

    /// Returns the decompressed size of every frame payload in bytes.
    pub fn frame_size(&self) -> usize {
        self.header.frame_size as usize
    }

    /// Returns the absolute position and length of frame `index`'s compressed payload.
    /// ***Panics*** if `index` is out of bounds.
    pub fn byte_range(&self, index: u32) -> (u64, usize) {
        assert!(index < self.header.num_frames, "invalid frame index");
        let start = self.offsets[index as usize];
        let end = self.offsets[index as usize + 1];
        // A damaged table may contain a zero-length (or even backwards) entry. Surface it as an
        // empty payload and let the codec reject it rather than failing the whole container.
        (u64::from(start), end.saturating_sub(start) as usize)
    }

    /// Returns the absolute position where the ADPCM stream begins.
    pub fn audio_offset(&self) -> u64 {
        u64::from(self.header.audio_offset)
    }
}
