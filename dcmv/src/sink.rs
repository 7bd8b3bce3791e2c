use crate::container::FrameType;
use crate::player::{AudioPump, Clock};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// The result type for sink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for sink operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("audio sink is not running")]
    NotStarted,

    #[error(transparent)]
    Io(Box<io::Error>),
}

from_error_boxed!(Error::Io, io::Error);

/// Displays decompressed frame payloads.
///
/// The presenter hands over one complete payload per presented frame; DMA, format conversion,
/// and scan-out timing are entirely the sink's business. Hardware bindings implement this on
/// top of their GPU's texture upload path.
pub trait TextureSink {
    /// Displays `frame` on the next vsync.
    fn load(&mut self, frame: &[u8], frame_type: FrameType) -> Result<()>;
}

/// Plays an ADPCM byte stream by pulling from an [`AudioPump`].
///
/// `start()` hands the sink the pump to pull from; afterwards `poll()` must be called
/// periodically to keep the sink's buffers full. The decode worker polls between loads, so
/// pull-based sinks need no thread of their own.
pub trait AudioSink: Send {
    fn start(&mut self, sample_rate: u32, channels: u16, pump: Arc<AudioPump>) -> Result<()>;
    fn poll(&mut self) -> Result<()>;
    fn stop(&mut self);
}

/// A texture sink that discards every frame.
#[derive(Debug, Default)]
pub struct NullTextureSink;

impl TextureSink for NullTextureSink {
    fn load(&mut self, _frame: &[u8], _frame_type: FrameType) -> Result<()> {
        Ok(())
    }
}

/// An audio sink that never pulls. Playback runs video-only; the pump's byte counter stays at
/// zero.
#[derive(Debug, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn start(&mut self, _sample_rate: u32, _channels: u16, _pump: Arc<AudioPump>) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Byte budget requested from the pump per `poll()` burst.
const PACED_CHUNK_SIZE: usize = 8192;

/// An audio sink that consumes ADPCM bytes at their nominal rate against a [`Clock`].
///
/// This stands in for a streaming DSP: each sample is four bits, so a mono stream drains
/// `sample_rate / 2` bytes per second and a stereo stream twice that. The decoded audio goes
/// nowhere; the sink exists to exercise the pump and drive the byte counter during headless
/// playback and tests.
pub struct PacedAudioSink {
    clock: Arc<dyn Clock>,
    running: Option<PacedState>,
}

struct PacedState {
    pump: Arc<AudioPump>,
    stereo: bool,
    bytes_per_ms: f64,
    last_poll_ms: f64,
    /// Fractional bytes carried between polls so the long-run rate stays exact.
    carry: f64,
    left: Vec<u8>,
    right: Vec<u8>,
}

impl PacedAudioSink {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, running: None }
    }
}

impl AudioSink for PacedAudioSink {
    fn start(&mut self, sample_rate: u32, channels: u16, pump: Arc<AudioPump>) -> Result<()> {
        let bytes_per_ms = f64::from(sample_rate) / 2.0 * f64::from(channels) / 1000.0;
        debug!("Paced audio sink: {} Hz, {} ch, {:.2} bytes/ms", sample_rate, channels, bytes_per_ms);
        self.running = Some(PacedState {
            pump,
            stereo: channels == 2,
            bytes_per_ms,
            last_poll_ms: self.clock.now_ms(),
            carry: 0.0,
            left: vec![0u8; PACED_CHUNK_SIZE],
            right: vec![0u8; PACED_CHUNK_SIZE],
        });
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        let state = match &mut self.running {
            Some(state) => state,
            None => return Err(Error::NotStarted),
        };
        let now = self.clock.now_ms();
        let elapsed = (now - state.last_poll_ms).max(0.0);
        state.last_poll_ms = now;

        let due = elapsed * state.bytes_per_ms + state.carry;
        let mut budget = due as usize;
        state.carry = due - budget as f64;
        if state.stereo {
            budget &= !1;
        }
        while budget > 0 {
            let request = budget.min(PACED_CHUNK_SIZE);
            let produced = if state.stereo {
                let half = request / 2;
                state.pump.fill(&mut state.left[..half], Some(&mut state.right[..half]))
            } else {
                state.pump.fill(&mut state.left[..request], None)
            };
            budget -= request;
            if produced == 0 {
                // The stream ran dry; a real DSP would keep zero-padding.
                break;
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.running = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ManualClock;
    use std::io::Cursor;

    fn test_pump(len: usize) -> Arc<AudioPump> {
        let audio: Vec<u8> = (0..len).map(|i| i as u8).collect();
        Arc::new(AudioPump::new(Box::new(Cursor::new(audio)), 0).unwrap())
    }

    #[test]
    fn test_paced_sink_consumes_at_nominal_rate() {
        let clock = Arc::new(ManualClock::new());
        let mut sink = PacedAudioSink::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let pump = test_pump(0x10000);
        // 32000 Hz mono: 16000 bytes per second.
        sink.start(32000, 1, Arc::clone(&pump)).unwrap();

        clock.advance_ms(100.0);
        sink.poll().unwrap();
        assert_eq!(pump.bytes_fed(), 1600);

        // Rate holds over many small polls, including fractional amounts.
        for _ in 0..100 {
            clock.advance_ms(2.5);
            sink.poll().unwrap();
        }
        assert_eq!(pump.bytes_fed(), 1600 + 4000);
    }

    #[test]
    fn test_paced_sink_stereo_rate_doubles() {
        let clock = Arc::new(ManualClock::new());
        let mut sink = PacedAudioSink::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let pump = test_pump(0x10000);
        sink.start(22050, 2, Arc::clone(&pump)).unwrap();

        clock.advance_ms(1000.0);
        sink.poll().unwrap();
        // 22050 Hz stereo: 22050 bytes per second, rounded down to an even split.
        assert_eq!(pump.bytes_fed(), 22048);
    }

    #[test]
    fn test_paced_sink_requires_start() {
        let clock = Arc::new(ManualClock::new());
        let mut sink = PacedAudioSink::new(clock);
        assert!(matches!(sink.poll(), Err(Error::NotStarted)));
    }

    #[test]
    fn test_paced_sink_survives_dry_stream() {
        let clock = Arc::new(ManualClock::new());
        let mut sink = PacedAudioSink::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let pump = test_pump(100);
        sink.start(32000, 1, Arc::clone(&pump)).unwrap();
        clock.advance_ms(10_000.0);
        sink.poll().unwrap();
        assert_eq!(pump.bytes_fed(), 100);
        clock.advance_ms(10.0);
        sink.poll().unwrap();
        assert_eq!(pump.bytes_fed(), 100);
    }
}
