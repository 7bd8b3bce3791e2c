use std::io::{self, ErrorKind, Read, Write};

pub const BUFFER_SIZE: usize = 0x8000;

/// Implementation of `std::io::copy` which uses `buf` as the buffer. This can be much faster than
/// the built-in implementation.
pub fn copy_buffered(
    reader: &mut (impl Read + ?Sized),
    writer: &mut (impl Write + ?Sized),
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut total = 0;
    loop {
        let num_read = match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..num_read])?;
        total += num_read as u64;
    }
}
