use crate::common::ReadSeek;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Streams raw ADPCM bytes from the container's audio region into the audio sink's buffers.
///
/// The pump owns its own handle into the container so the sink's callback never contends with
/// the decode worker's cursor. `fill()` is invoked from the sink's callback context; everything
/// else is presenter-side. The byte counter advances with every read and anchors playback
/// statistics.
pub struct AudioPump {
    handle: Mutex<Box<dyn ReadSeek>>,
    /// Absolute container position where the ADPCM region starts.
    audio_offset: u64,
    muted: AtomicBool,
    bytes_fed: AtomicU64,
    underflow_logged: AtomicBool,
}

impl AudioPump {
    /// Creates a pump reading from `handle`, positioned at the start of the audio region.
    pub fn new(mut handle: Box<dyn ReadSeek>, audio_offset: u64) -> io::Result<Self> {
        handle.seek(SeekFrom::Start(audio_offset))?;
        Ok(Self {
            handle: Mutex::new(handle),
            audio_offset,
            muted: AtomicBool::new(false),
            bytes_fed: AtomicU64::new(0),
            underflow_logged: AtomicBool::new(false),
        })
    }

    /// Fills the sink's channel buffers with ADPCM bytes and returns how many bytes were
    /// produced. Mono sinks pass `None` for `right`; stereo sinks pass two equally sized
    /// buffers and receive the first half of the read in `left` and the second in `right`.
    ///
    /// While muted the buffers are zeroed and the full request is reported, so the sink keeps
    /// ticking without consuming the stream.
    pub fn fill(&self, left: &mut [u8], right: Option<&mut [u8]>) -> usize {
        let requested = left.len() + right.as_ref().map_or(0, |r| r.len());
        if self.muted.load(Ordering::Acquire) {
            left.fill(0);
            if let Some(right) = right {
                right.fill(0);
            }
            return requested;
        }

        let mut handle = self.handle.lock().unwrap();
        let mut produced = read_until_eof(&mut **handle, left);
        if let Some(right) = right {
            produced += read_until_eof(&mut **handle, right);
        }
        drop(handle);

        self.bytes_fed.fetch_add(produced as u64, Ordering::Relaxed);
        if produced < requested && !self.underflow_logged.swap(true, Ordering::Relaxed) {
            warn!("Audio underflow: requested {} bytes, produced {}", requested, produced);
        }
        produced
    }

    /// Mutes or unmutes the stream. Muted fills produce silence without moving the cursor.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Total bytes handed to the sink since playback start.
    pub fn bytes_fed(&self) -> u64 {
        self.bytes_fed.load(Ordering::Acquire)
    }

    /// Repositions the stream to `bytes` past the start of the audio region. Presenter only;
    /// callers are expected to mute around the reposition.
    pub fn reposition(&self, bytes: u64) -> io::Result<()> {
        let mut handle = self.handle.lock().unwrap();
        handle.seek(SeekFrom::Start(self.audio_offset + bytes))?;
        self.underflow_logged.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// Reads as much of `buf` as the stream can provide. Short reads only happen at end of stream
/// or on I/O errors, both of which the caller reports as an underflow.
fn read_until_eof(reader: &mut dyn Read, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Audio read failed: {}", e);
                break;
            }
        }
    }
    filled
}
