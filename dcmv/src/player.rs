mod audio;
mod clock;
mod pool;
mod ring;
mod worker;

pub use audio::AudioPump;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use pool::{BufferPool, Slot, SlotState};
pub use ring::PreloadRing;

use crate::codec::FrameCodec;
use crate::common::ReadSeek;
use crate::container::{self, ContainerReader, FrameType};
use crate::sink::{self, AudioSink, TextureSink};
use std::hint;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use worker::Worker;

/// The result type for player operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for player operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(f32),

    #[error(transparent)]
    Container(#[from] container::Error),

    #[error(transparent)]
    Sink(#[from] sink::Error),

    #[error(transparent)]
    Io(Box<io::Error>),
}

from_error_boxed!(Error::Io, io::Error);

/// Sentinel for "no seek pending".
const NO_SEEK: i64 = -1;

/// Tunables for a playback run.
#[derive(Debug, Copy, Clone)]
pub struct PlayerOptions {
    /// Number of frame buffers in the pool (also the preload ring's depth). At least 2.
    pub num_buffers: usize,
    /// How many frames a seek-forward/seek-backward request jumps.
    pub seek_step: u32,
    /// How many consecutive stalls on one frame before it is treated as dropped.
    pub stall_threshold: u32,
    /// The frame to start playback at.
    pub start_frame: u32,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self { num_buffers: 8, seek_step: 500, stall_threshold: 3, start_frame: 0 }
    }
}

/// Counters reported after a playback run.
#[derive(Debug, Copy, Clone, Default)]
pub struct PlaybackStats {
    pub frames_presented: u32,
    pub frames_dropped: u32,
    pub stalls: u32,
    pub max_frame_ms: f64,
    pub avg_frame_ms: f64,
    pub audio_bytes_fed: u64,
}

/// State shared between the presenter, the decode worker, and the audio callback.
pub(crate) struct Shared {
    pub(crate) pool: BufferPool,
    pub(crate) ring: PreloadRing,
    pub(crate) pump: Arc<AudioPump>,
    /// The next frame to present.
    pub(crate) frame_index: AtomicU32,
    /// Pending seek target, or `NO_SEEK`. Drained only by the presenter.
    pub(crate) seek_request: AtomicI64,
    pub(crate) exit: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    /// Media time (in milliseconds, as `f64` bits) of the first sample queued at the current
    /// audio play position. Set at start and at every seek.
    pub(crate) audio_start_ms: AtomicU64,
}

/// A cloneable control handle for a running player. Seek requests are a single atomic token
/// consumed by the presentation loop, so their effects always appear atomically.
#[derive(Clone)]
pub struct PlayerControls {
    shared: Arc<Shared>,
    seek_step: u32,
    num_frames: u32,
}

impl PlayerControls {
    /// The next frame the presenter will draw.
    pub fn current_frame(&self) -> u32 {
        self.shared.frame_index.load(Ordering::Acquire)
    }

    /// Requests a seek to `frame` (clamped to the container).
    pub fn seek_to(&self, frame: u32) {
        let clamped = frame.min(self.num_frames - 1);
        self.shared.seek_request.store(i64::from(clamped), Ordering::Release);
    }

    /// Requests a jump forward by the configured seek step.
    pub fn seek_forward(&self) {
        self.seek_to(self.current_frame().saturating_add(self.seek_step));
    }

    /// Requests a jump backward by the configured seek step.
    pub fn seek_backward(&self) {
        self.seek_to(self.current_frame().saturating_sub(self.seek_step));
    }

    /// Requests a clean shutdown.
    pub fn exit(&self) {
        self.shared.exit.store(true, Ordering::Release);
    }
}

/// Plays one container: owns both file handles, the buffer pool, the preload ring, the decode
/// worker, and the clock state. Lifetime runs from open to drop.
pub struct Player {
    shared: Arc<Shared>,
    reader: Arc<ContainerReader>,
    clock: Arc<dyn Clock>,
    texture_sink: Box<dyn TextureSink>,
    audio_sink: Arc<Mutex<Box<dyn AudioSink>>>,
    options: PlayerOptions,
    worker: Option<JoinHandle<()>>,
    frame_type: FrameType,
    frame_ms: f64,
    /// Timestamp of the most recent start/seek; the audio clock is `audio_start_ms` plus the
    /// time elapsed since this instant.
    frame_start_time: f64,
    /// Accumulated signed timing error. Positive means frames have been finishing early.
    debt: f64,
    stall_count: u32,
}

impl Player {
    /// Opens the container at `path` and prepares a player over it.
    pub fn open(
        path: impl AsRef<Path>,
        codec: Arc<dyn FrameCodec>,
        clock: Arc<dyn Clock>,
        texture_sink: Box<dyn TextureSink>,
        audio_sink: Box<dyn AudioSink>,
        options: PlayerOptions,
    ) -> Result<Self> {
        let (reader, video, audio) = ContainerReader::open(path)?;
        Self::new(reader, Box::new(video), Box::new(audio), codec, clock, texture_sink, audio_sink, options)
    }

    /// Creates a player from a parsed container and two independent handles into it. Spawns the
    /// decode worker immediately; playback begins with `run()`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: ContainerReader,
        video: Box<dyn ReadSeek>,
        audio: Box<dyn ReadSeek>,
        codec: Arc<dyn FrameCodec>,
        clock: Arc<dyn Clock>,
        texture_sink: Box<dyn TextureSink>,
        audio_sink: Box<dyn AudioSink>,
        options: PlayerOptions,
    ) -> Result<Self> {
        let header = *reader.header();
        if !(header.frame_rate.is_finite() && header.frame_rate > 0.0) {
            return Err(Error::InvalidFrameRate(header.frame_rate));
        }

        let pump = Arc::new(AudioPump::new(audio, reader.audio_offset())?);
        let shared = Arc::new(Shared {
            pool: BufferPool::new(options.num_buffers, reader.frame_size()),
            ring: PreloadRing::new(options.num_buffers),
            pump,
            frame_index: AtomicU32::new(0),
            seek_request: AtomicI64::new(NO_SEEK),
            exit: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            audio_start_ms: AtomicU64::new(0f64.to_bits()),
        });
        let reader = Arc::new(reader);
        let audio_sink = Arc::new(Mutex::new(audio_sink));

        let worker = Worker {
            shared: Arc::clone(&shared),
            reader: Arc::clone(&reader),
            codec,
            video,
            audio_sink: Arc::clone(&audio_sink),
            scratch: vec![0u8; header.max_compressed_size as usize],
        };
        let handle = thread::Builder::new()
            .name("dcmv-decode".to_owned())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            reader,
            clock,
            texture_sink,
            audio_sink,
            options,
            worker: Some(handle),
            frame_type: header.frame_type,
            frame_ms: 1000.0 / f64::from(header.frame_rate),
            frame_start_time: 0.0,
            debt: 0.0,
            stall_count: 0,
        })
    }

    /// Returns a control handle usable from any thread.
    pub fn controls(&self) -> PlayerControls {
        PlayerControls {
            shared: Arc::clone(&self.shared),
            seek_step: self.options.seek_step,
            num_frames: self.reader.num_frames(),
        }
    }

    /// Runs playback to the end of the container (or until an exit request) and reports what
    /// happened.
    pub fn run(&mut self) -> Result<PlaybackStats> {
        let shared = Arc::clone(&self.shared);
        let header = *self.reader.header();
        let num_frames = header.num_frames;
        info!(
            "Starting playback: {} frames at {} fps ({:.2} ms per frame)",
            num_frames, header.frame_rate, self.frame_ms,
        );

        self.audio_sink.lock().unwrap().start(
            u32::from(header.sample_rate),
            header.channels,
            Arc::clone(&shared.pump),
        )?;
        self.seek(self.options.start_frame)?;

        let mut stats = PlaybackStats::default();
        let mut frame_time_total = 0.0;
        loop {
            if shared.exit.load(Ordering::Acquire) {
                debug!("Exit requested");
                break;
            }
            let requested = shared.seek_request.swap(NO_SEEK, Ordering::AcqRel);
            if requested != NO_SEEK {
                self.seek(requested as u32)?;
                self.debt = 0.0;
                continue;
            }

            let mut i = shared.frame_index.load(Ordering::Acquire);
            if i >= num_frames {
                break;
            }

            let audio_start = f64::from_bits(shared.audio_start_ms.load(Ordering::Acquire));
            let current_audio_ms = audio_start + (self.clock.now_ms() - self.frame_start_time);

            // If the video clock fell behind the point the audio was (re)started at, drop frames
            // until it catches up rather than playing them late forever.
            let mut skipped = 0u32;
            while i + 1 < num_frames && f64::from(i) * self.frame_ms < audio_start {
                i += 1;
                skipped += 1;
            }
            if skipped > 0 {
                self.debt = 0.0;
                stats.frames_dropped += skipped;
                shared.frame_index.store(i, Ordering::Release);
                trace!("Dropped {} frames to catch up with the audio clock", skipped);
            }

            let expected = f64::from(i) * self.frame_ms;
            let target = expected + self.debt.clamp(-self.frame_ms * 0.5, self.frame_ms * 0.5);
            if current_audio_ms >= target {
                self.present(&shared, i, num_frames, &mut stats, &mut frame_time_total)?;
            } else {
                let wait_ms = target - current_audio_ms;
                if wait_ms > 8.0 {
                    thread::sleep(Duration::from_secs_f64((wait_ms - 3.0) / 1000.0));
                } else if wait_ms > 1.0 {
                    thread::yield_now();
                } else {
                    hint::spin_loop();
                }
            }
        }

        self.shutdown_worker();
        self.audio_sink.lock().unwrap().stop();

        if stats.frames_presented > 0 {
            stats.avg_frame_ms = frame_time_total / f64::from(stats.frames_presented);
        }
        stats.audio_bytes_fed = shared.pump.bytes_fed();
        info!(
            "Playback finished: {} presented, {} dropped, {} stalls, frame time max {:.1} ms avg {:.1} ms",
            stats.frames_presented,
            stats.frames_dropped,
            stats.stalls,
            stats.max_frame_ms,
            stats.avg_frame_ms,
        );
        Ok(stats)
    }

    /// One presentation attempt for frame `i`, which is due now.
    fn present(
        &mut self,
        shared: &Shared,
        i: u32,
        num_frames: u32,
        stats: &mut PlaybackStats,
        frame_time_total: &mut f64,
    ) -> Result<()> {
        let slot = shared.pool.slot(i);
        if slot.state() == SlotState::Ready {
            let render_start = self.clock.now_ms();
            slot.read(|payload| self.texture_sink.load(payload, self.frame_type))?;
            slot.set_empty();
            self.stall_count = 0;
            if i + 1 < num_frames && shared.pool.slot(i + 1).state() == SlotState::Empty {
                shared.ring.push(i + 1);
            }
            shared.frame_index.store(i + 1, Ordering::Release);
            stats.frames_presented += 1;

            let this_frame = self.clock.now_ms() - render_start;
            *frame_time_total += this_frame;
            stats.max_frame_ms = stats.max_frame_ms.max(this_frame);
            let overrun = this_frame - self.frame_ms;
            if overrun > 0.0 {
                self.debt -= overrun;
            } else {
                self.debt += -overrun * 0.1;
            }
            self.debt *= 0.95;
            if this_frame > self.frame_ms * 0.8 {
                warn!(
                    "Frame {} took {:.1} ms ({:.0}% of the frame budget), debt {:.1} ms",
                    i,
                    this_frame,
                    this_frame / self.frame_ms * 100.0,
                    self.debt,
                );
            }
        } else {
            self.stall_count += 1;
            stats.stalls += 1;
            if self.stall_count == 1 && slot.state() == SlotState::Empty {
                // The worker may have dropped this frame's request against a busy slot; ask
                // again before giving up on it.
                shared.ring.push(i);
            }
            if self.stall_count >= self.options.stall_threshold {
                warn!("Skipping frame {} after {} stalls", i, self.stall_count);
                shared.frame_index.store(i + 1, Ordering::Release);
                stats.frames_dropped += 1;
                self.stall_count = 0;
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
        Ok(())
    }

    /// Repositions playback at frame `target` (clamped): flushes the pipeline, moves the audio
    /// cursor to the matching 16-byte ADPCM block boundary, and primes the preload ring.
    fn seek(&mut self, target: u32) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let header = *self.reader.header();
        let t = target.min(header.num_frames - 1);

        shared.pump.set_muted(true);
        shared.pool.reset();
        shared.ring.reset();

        let samples_per_frame = (f64::from(header.sample_rate) / f64::from(header.frame_rate)) as u64;
        let seek_samples = u64::from(t) * samples_per_frame;
        // Two 4-bit samples per byte, rounded up to the DSP's 16-byte block alignment.
        let bytes_to_skip = (seek_samples / 2 + 15) & !15;
        shared.pump.reposition(bytes_to_skip)?;

        let audio_ms = seek_samples as f64 * 1000.0 / f64::from(header.sample_rate);
        shared.audio_start_ms.store(audio_ms.to_bits(), Ordering::Release);
        shared.frame_index.store(t, Ordering::Release);

        let end = header.num_frames.min(t + shared.pool.len() as u32);
        for frame in t..end {
            shared.ring.push(frame);
        }

        self.frame_start_time = self.clock.now_ms();
        self.stall_count = 0;
        shared.pump.set_muted(false);
        debug!(
            "Seek to frame {} (audio byte {:#x}, media time {:.1} ms)",
            t, bytes_to_skip, audio_ms,
        );
        Ok(())
    }

    fn shutdown_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.shutdown.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        // Do not let the worker thread dangle!
        self.shutdown_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Identity;
    use crate::common::WriteStructExt;
    use crate::container::{FileHeader, HEADER_SIZE};
    use crate::sink::PacedAudioSink;
    use byteorder::{WriteBytesExt, LE};
    use std::io::{Cursor, Write};

    const FRAME_SIZE: u32 = 64;
    const FRAME_RATE: f32 = 30.0;
    const SAMPLE_RATE: u16 = 16000;

    /// Builds an identity-codec container where frame `i`'s payload is `[i as u8; FRAME_SIZE]`,
    /// with `frame_lens[i]` stored bytes per frame (normally `FRAME_SIZE`; zero simulates a
    /// damaged offset table).
    fn build_container(frame_lens: &[u32], audio_len: usize) -> Vec<u8> {
        let num_frames = frame_lens.len() as u32;
        let data_start = HEADER_SIZE as u32 + (num_frames + 1) * 4;
        let mut offsets = vec![data_start];
        for len in frame_lens {
            offsets.push(offsets.last().unwrap() + len);
        }
        let header = FileHeader {
            frame_type: FrameType::Macroblock,
            width: 32,
            height: 16,
            frame_rate: FRAME_RATE,
            sample_rate: SAMPLE_RATE,
            channels: 1,
            num_frames,
            frame_size: FRAME_SIZE,
            max_compressed_size: FRAME_SIZE,
            audio_offset: *offsets.last().unwrap(),
        };
        let mut cursor = Cursor::new(vec![]);
        cursor.write_struct(&header).unwrap();
        for offset in &offsets {
            cursor.write_u32::<LE>(*offset).unwrap();
        }
        for (i, len) in frame_lens.iter().enumerate() {
            cursor.write_all(&vec![i as u8; *len as usize]).unwrap();
        }
        let audio: Vec<u8> = (0..audio_len).map(|b| b as u8).collect();
        cursor.write_all(&audio).unwrap();
        cursor.into_inner()
    }

    /// A texture sink that records the first byte of every frame it draws.
    struct RecordingSink {
        drawn: Arc<Mutex<Vec<u8>>>,
    }

    impl TextureSink for RecordingSink {
        fn load(&mut self, frame: &[u8], _frame_type: FrameType) -> sink::Result<()> {
            self.drawn.lock().unwrap().push(frame[0]);
            Ok(())
        }
    }

    struct Harness {
        player: Player,
        drawn: Arc<Mutex<Vec<u8>>>,
        clock: Arc<ManualClock>,
    }

    fn harness(bytes: Vec<u8>, options: PlayerOptions) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let drawn = Arc::new(Mutex::new(vec![]));
        let mut probe = Cursor::new(bytes.clone());
        let reader = ContainerReader::new(&mut probe).unwrap();
        let player = Player::new(
            reader,
            Box::new(Cursor::new(bytes.clone())),
            Box::new(Cursor::new(bytes)),
            Arc::new(Identity),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Box::new(RecordingSink { drawn: Arc::clone(&drawn) }),
            Box::new(PacedAudioSink::new(Arc::clone(&clock) as Arc<dyn Clock>)),
            options,
        )
        .unwrap();
        Harness { player, drawn, clock }
    }

    /// Advances the manual clock from a helper thread so `run()` experiences passing time at
    /// roughly 40x real speed.
    fn accelerate(clock: Arc<ManualClock>) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    clock.advance_ms(2.0);
                    thread::sleep(Duration::from_micros(50));
                }
            })
        };
        (stop, handle)
    }

    fn run_player(mut h: Harness) -> (PlaybackStats, Vec<u8>) {
        let (stop, accel) = accelerate(Arc::clone(&h.clock));
        let stats = h.player.run().unwrap();
        stop.store(true, Ordering::Relaxed);
        accel.join().unwrap();
        let drawn = h.drawn.lock().unwrap().clone();
        (stats, drawn)
    }

    #[test]
    fn test_playback_runs_to_completion() {
        let num_frames = 30;
        let bytes = build_container(&vec![FRAME_SIZE; num_frames], 0x8000);
        let h = harness(bytes, PlayerOptions::default());
        let (stats, drawn) = run_player(h);

        assert_eq!(stats.frames_presented + stats.frames_dropped, num_frames as u32);
        assert!(stats.frames_dropped <= 5, "dropped {} frames", stats.frames_dropped);
        assert!(drawn.windows(2).all(|w| w[0] < w[1]), "frames drawn out of order: {:?}", drawn);
        assert!(stats.audio_bytes_fed > 0);
        assert!(stats.audio_bytes_fed <= 0x8000);

        // The audio consumed must agree with the video presented: both run off the same clock,
        // so the byte counter divided by the per-frame byte rate tracks the frame count.
        let bytes_per_frame = f64::from(SAMPLE_RATE) / 2.0 / f64::from(FRAME_RATE);
        let audio_frames = stats.audio_bytes_fed as f64 / bytes_per_frame;
        assert!(
            (audio_frames - num_frames as f64).abs() <= 10.0,
            "audio clock ran {} frames against {} video frames",
            audio_frames,
            num_frames,
        );
    }

    #[test]
    fn test_playback_with_two_buffers() {
        let bytes = build_container(&vec![FRAME_SIZE; 12], 0x4000);
        let options = PlayerOptions { num_buffers: 2, ..Default::default() };
        let h = harness(bytes, options);
        let (stats, drawn) = run_player(h);
        assert_eq!(stats.frames_presented + stats.frames_dropped, 12);
        assert!(drawn.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_start_frame_seeks_before_first_draw() {
        let num_frames = 30;
        let bytes = build_container(&vec![FRAME_SIZE; num_frames], 0x8000);
        let options = PlayerOptions { start_frame: 20, ..Default::default() };
        let h = harness(bytes, options);
        let (stats, drawn) = run_player(h);

        // The first drawn frame must land inside the seek's preload window.
        assert!(!drawn.is_empty());
        assert!(drawn[0] >= 20 && drawn[0] < 20 + 8, "first drawn frame was {}", drawn[0]);
        assert_eq!(stats.frames_presented + stats.frames_dropped, 10);
    }

    #[test]
    fn test_control_seek_is_drained_before_drawing() {
        let num_frames = 30;
        let bytes = build_container(&vec![FRAME_SIZE; num_frames], 0x8000);
        let h = harness(bytes, PlayerOptions::default());
        let controls = h.player.controls();
        controls.seek_to(20);
        let (stats, drawn) = run_player(h);

        // Only the post-seek span is played. (A frame drawn from a stale buffer right after the
        // seek is tolerated; the span accounting must still hold.)
        assert!(!drawn.is_empty());
        assert_eq!(stats.frames_presented + stats.frames_dropped, 10);
    }

    #[test]
    fn test_start_past_end_clamps_to_last_frame() {
        let bytes = build_container(&vec![FRAME_SIZE; 10], 0x2000);
        let options = PlayerOptions { start_frame: 5000, ..Default::default() };
        let h = harness(bytes, options);
        let (stats, drawn) = run_player(h);
        // Clamped to the final frame; exactly one frame left to show.
        assert_eq!(stats.frames_presented + stats.frames_dropped, 1);
        if let Some(&first) = drawn.first() {
            assert_eq!(first, 9);
        }
    }

    #[test]
    fn test_zero_length_frame_is_skipped_not_fatal() {
        let mut frame_lens = vec![FRAME_SIZE; 20];
        frame_lens[5] = 0;
        let bytes = build_container(&frame_lens, 0x4000);
        let h = harness(bytes, PlayerOptions::default());
        let (stats, drawn) = run_player(h);

        assert!(!drawn.contains(&5), "the damaged frame must not be drawn");
        assert!(stats.frames_dropped >= 1);
        assert_eq!(stats.frames_presented + stats.frames_dropped, 20);
        assert!(stats.stalls >= 1);
    }

    #[test]
    fn test_exit_request_stops_playback() {
        let bytes = build_container(&vec![FRAME_SIZE; 1000], 0x8000);
        let h = harness(bytes, PlayerOptions::default());
        let controls = h.player.controls();
        controls.exit();
        let (stats, _) = run_player(h);
        assert_eq!(stats.frames_presented, 0);
    }

    #[test]
    fn test_controls_step_and_clamp() {
        let bytes = build_container(&vec![FRAME_SIZE; 50], 0x2000);
        let options = PlayerOptions { seek_step: 30, ..Default::default() };
        let h = harness(bytes, options);
        let controls = h.player.controls();

        controls.seek_forward();
        assert_eq!(h.player.shared.seek_request.load(Ordering::Acquire), 30);
        controls.seek_backward();
        assert_eq!(h.player.shared.seek_request.load(Ordering::Acquire), 0);
        controls.seek_to(1000);
        assert_eq!(h.player.shared.seek_request.load(Ordering::Acquire), 49);
    }

    #[test]
    fn test_invalid_frame_rate_is_rejected() {
        let mut bytes = build_container(&vec![FRAME_SIZE; 2], 0x100);
        // The frame rate field sits after magic, version, frame type, width, and height.
        bytes[13..17].copy_from_slice(&0f32.to_le_bytes());
        let mut probe = Cursor::new(bytes.clone());
        let reader = ContainerReader::new(&mut probe).unwrap();
        let clock = Arc::new(ManualClock::new());
        let result = Player::new(
            reader,
            Box::new(Cursor::new(bytes.clone())),
            Box::new(Cursor::new(bytes)),
            Arc::new(Identity),
            clock as Arc<dyn Clock>,
            Box::new(crate::sink::NullTextureSink),
            Box::new(crate::sink::NullAudioSink),
            PlayerOptions::default(),
        );
        assert!(matches!(result, Err(Error::InvalidFrameRate(_))));
    }
}
