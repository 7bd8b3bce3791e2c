use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use thiserror::Error;

/// The result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for codec operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("compressed block is truncated or corrupt")]
    Corrupt,

    #[error("block decompressed to {0:#x} bytes, expected {1:#x}")]
    WrongSize(usize, usize),

    #[error(transparent)]
    Io(Box<io::Error>),
}

from_error_boxed!(Error::Io, io::Error);

/// Block compression over opaque frame payloads.
///
/// Compressed blocks are bare: no magic, no length prefix, no checksum. The container's offset
/// table supplies block boundaries and the header supplies the decompressed size, so
/// `decompress()` must fill `dst` exactly or fail.
pub trait FrameCodec: Send + Sync {
    /// The codec's name, for logs and CLI selection.
    fn name(&self) -> &'static str;

    /// Compresses `src` into a standalone block.
    fn compress(&self, src: &[u8]) -> Result<Vec<u8>>;

    /// Decompresses `src`, filling `dst` exactly.
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<()>;
}

/// Raw DEFLATE blocks without a zlib or gzip envelope. The decompressed size comes from the
/// container header, so the envelope would only cost bytes per frame.
#[derive(Debug, Default, Copy, Clone)]
pub struct Deflate;

impl FrameCodec for Deflate {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(9));
        encoder.write_all(src)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let mut decoder = DeflateDecoder::new(src);
        let mut filled = 0;
        while filled < dst.len() {
            match decoder.read(&mut dst[filled..]) {
                Ok(0) => return Err(Error::WrongSize(filled, dst.len())),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => return Err(Error::Corrupt),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => return Err(Error::Corrupt),
                Err(e) => return Err(e.into()),
            }
        }
        // The block must end exactly at the expected size.
        let mut probe = [0u8];
        match decoder.read(&mut probe) {
            Ok(0) => Ok(()),
            Ok(_) => Err(Error::WrongSize(dst.len() + 1, dst.len())),
            Err(_) => Err(Error::Corrupt),
        }
    }
}

/// Stored blocks: the compressed form is the payload itself. Useful for diagnosing codec issues
/// and for exercising the pipeline in tests.
#[derive(Debug, Default, Copy, Clone)]
pub struct Identity;

impl FrameCodec for Identity {
    fn name(&self) -> &'static str {
        "store"
    }

    fn compress(&self, src: &[u8]) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }

    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        if src.len() != dst.len() {
            return Err(Error::WrongSize(src.len(), dst.len()));
        }
        dst.copy_from_slice(src);
        Ok(())
    }
}
