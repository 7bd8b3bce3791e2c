use super::Shared;
use crate::codec::FrameCodec;
use crate::common::ReadSeek;
use crate::container::ContainerReader;
use crate::sink::AudioSink;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{trace, warn};

/// How long the worker sleeps when the preload ring is empty.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// The decode worker: pops preload requests, reads compressed payloads from the video handle,
/// and decompresses them into the buffer pool.
///
/// Exactly one worker exists per player, which makes it the ring's single consumer and the only
/// thread that ever writes frame payloads. Between loads it also polls the audio sink so
/// pull-based sinks stay fed without a thread of their own.
pub(super) struct Worker {
    pub(super) shared: Arc<Shared>,
    pub(super) reader: Arc<ContainerReader>,
    pub(super) codec: Arc<dyn FrameCodec>,
    pub(super) video: Box<dyn ReadSeek>,
    pub(super) audio_sink: Arc<Mutex<Box<dyn AudioSink>>>,
    /// Reusable buffer for compressed payloads, sized to the header's bound.
    pub(super) scratch: Vec<u8>,
}

impl Worker {
    pub(super) fn run(mut self) {
        trace!("Decode worker starting");
        while !self.shared.shutdown.load(Ordering::Acquire) {
            match self.shared.ring.pop() {
                Some(index) if index < self.reader.num_frames() => self.load_frame(index),
                Some(index) => trace!("Ignoring stale preload request for frame {}", index),
                None => thread::sleep(IDLE_SLEEP),
            }
            if let Err(e) = self.audio_sink.lock().unwrap().poll() {
                trace!("Audio sink poll failed: {}", e);
            }
        }
        trace!("Decode worker shutting down");
    }

    fn load_frame(&mut self, index: u32) {
        let shared = Arc::clone(&self.shared);
        let slot = shared.pool.slot(index);
        if !slot.try_claim() {
            // A stale load can still be occupying this slot right after a seek.
            warn!("Dropping preload for frame {}: slot is busy", index);
            return;
        }

        let (offset, len) = self.reader.byte_range(index);
        if len > self.scratch.len() {
            warn!(
                "Frame {} is {:#x} compressed bytes, over the header bound of {:#x}",
                index,
                len,
                self.scratch.len(),
            );
            slot.set_empty();
            return;
        }
        if let Err(e) = self.read_compressed(offset, len) {
            warn!("Failed to read frame {}: {}", index, e);
            slot.set_empty();
            return;
        }

        let result = slot.fill(|payload| self.codec.decompress(&self.scratch[..len], payload));
        match result {
            Ok(()) => {
                slot.publish();
                trace!("Frame {} ready ({:#x} compressed bytes)", index, len);
            }
            Err(e) => {
                warn!("Failed to decompress frame {}: {}", index, e);
                slot.set_empty();
            }
        }
    }

    fn read_compressed(&mut self, offset: u64, len: usize) -> io::Result<()> {
        self.video.seek(SeekFrom::Start(offset))?;
        self.video.read_exact(&mut self.scratch[..len])
    }
}
