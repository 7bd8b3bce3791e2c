mod packer;
mod reader;

pub use packer::*;
pub use reader::*;

use crate::codec;
use crate::common::{ReadFrom, WriteTo};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::{self, Read, Write};
use thiserror::Error;

/// The magic string at the beginning of a DCMV file.
pub const DCMV_MAGIC: [u8; 4] = *b"DCMV";
/// The container version this implementation reads and writes.
pub const DCMV_VERSION: u32 = 3;

/// The size of the fixed header in bytes. The named fields occupy 37 bytes; the remainder is
/// reserved and must be zero. The offset table always begins here.
pub const HEADER_SIZE: u64 = 43;
/// Number of reserved bytes at the end of the fixed header.
const HEADER_RESERVED: usize = 6;

/// Magic string of a texture with a variable-size tool header: the skip is `(byte 9 + 1) * 32`.
const DCTX_MAGIC: [u8; 4] = *b"DcTx";
/// Magic strings of textures with a fixed 16-byte header.
const DTEX_MAGIC: [u8; 4] = *b"DTEX";
const PVRT_MAGIC: [u8; 4] = *b"PVRT";

/// Magic string of the optional audio-tool prefix. When present, the audio payload starts at
/// byte 64.
const DCAF_MAGIC: [u8; 4] = *b"DcAF";
const DCAF_PREFIX_SIZE: u64 = 64;

/// The result type for container operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for container operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid DCMV magic")]
    InvalidMagic,

    #[error("unsupported DCMV version: {0}")]
    UnsupportedVersion(u32),

    #[error("unrecognized frame type: {0}")]
    UnrecognizedFrameType(u8),

    #[error("invalid channel count: {0}")]
    InvalidChannelCount(u16),

    #[error("invalid frame count: {0}")]
    InvalidFrameCount(u32),

    #[error("no frames found matching pattern")]
    NoFrames,

    #[error("unknown texture format in frame 0")]
    UnknownTextureFormat,

    #[error("frame 0 is smaller than its texture header")]
    TruncatedTexture,

    #[error("frame {frame} is {len:#x} bytes, expected {expected:#x}")]
    FrameSizeMismatch { frame: u32, len: u64, expected: u64 },

    #[error("invalid frame pattern: {0}")]
    InvalidPattern(String),

    #[error("container grew past the 4 GiB offset limit")]
    OffsetOverflow,

    #[error(transparent)]
    Codec(#[from] codec::Error),

    #[error(transparent)]
    Io(Box<io::Error>),
}

from_error_boxed!(Error::Io, io::Error);

/// The encoding of each frame payload in a container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    /// VQ-compressed paletted tile texture. The packer strips the source texture header.
    Paletted = 0,
    /// Planar luma/chroma macroblocks, stored as-is.
    Macroblock = 1,
}

/// DCMV file header.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FileHeader {
    /// The encoding of the frame payloads.
    pub frame_type: FrameType,
    /// Video width in pixels. Multiple of 16.
    pub width: u16,
    /// Video height in pixels. Multiple of 16.
    pub height: u16,
    /// Encoded frame rate in frames per second.
    pub frame_rate: f32,
    /// Audio sample rate in Hz.
    pub sample_rate: u16,
    /// Number of audio channels (1 or 2).
    pub channels: u16,
    /// Number of video frames. At least 1.
    pub num_frames: u32,
    /// Decompressed payload size of every frame in bytes.
    pub frame_size: u32,
    /// Upper bound over all compressed frame payload sizes.
    pub max_compressed_size: u32,
    /// Absolute file position where the ADPCM stream begins.
    pub audio_offset: u32,
}

impl<R: Read + ?Sized> ReadFrom<R> for FileHeader {
    type Error = Error;
    fn read_from(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != DCMV_MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = reader.read_u32::<LE>()?;
        if version != DCMV_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let frame_type_byte = reader.read_u8()?;
        let frame_type = FrameType::try_from(frame_type_byte)
            .map_err(|_| Error::UnrecognizedFrameType(frame_type_byte))?;
        let width = reader.read_u16::<LE>()?;
        let height = reader.read_u16::<LE>()?;
        let frame_rate = reader.read_f32::<LE>()?;
        let sample_rate = reader.read_u16::<LE>()?;
        let channels = reader.read_u16::<LE>()?;
        if !(1..=2).contains(&channels) {
            return Err(Error::InvalidChannelCount(channels));
        }
        let num_frames = reader.read_u32::<LE>()?;
        if num_frames == 0 {
            return Err(Error::InvalidFrameCount(num_frames));
        }
        let frame_size = reader.read_u32::<LE>()?;
        let max_compressed_size = reader.read_u32::<LE>()?;
        let audio_offset = reader.read_u32::<LE>()?;
        let mut reserved = [0u8; HEADER_RESERVED];
        reader.read_exact(&mut reserved)?;
        Ok(Self {
            frame_type,
            width,
            height,
            frame_rate,
            sample_rate,
            channels,
            num_frames,
            frame_size,
            max_compressed_size,
            audio_offset,
        })
    }
}

impl<W: Write + ?Sized> WriteTo<W> for FileHeader {
    type Error = Error;
    fn write_to(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&DCMV_MAGIC)?;
        writer.write_u32::<LE>(DCMV_VERSION)?;
        writer.write_u8(self.frame_type.into())?;
        writer.write_u16::<LE>(self.width)?;
        writer.write_u16::<LE>(self.height)?;
        writer.write_f32::<LE>(self.frame_rate)?;
        writer.write_u16::<LE>(self.sample_rate)?;
        writer.write_u16::<LE>(self.channels)?;
        writer.write_u32::<LE>(self.num_frames)?;
        writer.write_u32::<LE>(self.frame_size)?;
        writer.write_u32::<LE>(self.max_compressed_size)?;
        writer.write_u32::<LE>(self.audio_offset)?;
        writer.write_all(&[0u8; HEADER_RESERVED])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_write_and_read;
    use crate::common::WriteStructExt;
    use std::io::Cursor;

    fn test_header() -> FileHeader {
        FileHeader {
            frame_type: FrameType::Paletted,
            width: 512,
            height: 256,
            frame_rate: 24.0,
            sample_rate: 32000,
            channels: 1,
            num_frames: 100,
            frame_size: 4096,
            max_compressed_size: 4100,
            audio_offset: 0x10000,
        }
    }

    #[test]
    fn test_write_and_read_header() {
        assert_write_and_read!(test_header());
    }

    #[test]
    fn test_header_is_fixed_size() -> Result<()> {
        let mut cursor = Cursor::new(vec![]);
        cursor.write_struct(&test_header())?;
        assert_eq!(cursor.into_inner().len() as u64, HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = Cursor::new(vec![]);
        bytes.write_struct(&test_header()).unwrap();
        let mut bytes = bytes.into_inner();
        bytes[0] = b'X';
        assert!(matches!(
            FileHeader::read_from(&mut Cursor::new(bytes)),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_header_rejects_bad_version() {
        let mut bytes = Cursor::new(vec![]);
        bytes.write_struct(&test_header()).unwrap();
        let mut bytes = bytes.into_inner();
        bytes[4] = 2;
        assert!(matches!(
            FileHeader::read_from(&mut Cursor::new(bytes)),
            Err(Error::UnsupportedVersion(2))
        ));
    }
}
