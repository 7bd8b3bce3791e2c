use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dcmv")]
#[command(about = "DCMV movie container packer and player", version)]
pub struct CliArgs {
    /// Enables debug logging (-vv for trace logging)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Packs pre-encoded texture frames and an ADPCM track into a container
    Pack(PackArgs),

    /// Plays a container against the built-in headless sinks
    Play(PlayArgs),

    /// Prints a container's header and region layout
    Info(InfoArgs),
}

/// The frame codec to compress or decompress payloads with. Containers do not record the codec;
/// both sides of a pipeline must agree on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    /// Raw DEFLATE blocks
    Deflate,
    /// Stored (uncompressed) blocks
    Store,
}

#[derive(Args)]
pub struct PackArgs {
    /// Path of the container to create
    pub output: PathBuf,

    /// Frame payload encoding: 0 = VQ paletted, 1 = planar macroblock
    pub frame_type: u8,

    /// Video width in pixels (multiple of 16)
    pub width: u16,

    /// Video height in pixels (multiple of 16)
    pub height: u16,

    /// Frame rate in frames per second
    pub frame_rate: f32,

    /// Audio sample rate in Hz
    pub sample_rate: u16,

    /// Audio channel count (1 or 2)
    pub channels: u16,

    /// printf-style frame filename pattern with one integer hole (e.g. frames/f%04d.pvr)
    pub frame_pattern: String,

    /// Path of the ADPCM audio stream (an optional DcAF prefix is stripped)
    pub audio_file: PathBuf,

    /// Frame codec to compress payloads with
    #[arg(long, value_enum, default_value_t = CodecArg::Deflate)]
    pub codec: CodecArg,
}

#[derive(Args)]
pub struct PlayArgs {
    /// Path of the container to play
    pub container: PathBuf,

    /// Frame codec the container was packed with
    #[arg(long, value_enum, default_value_t = CodecArg::Deflate)]
    pub codec: CodecArg,

    /// Frame to start playback at
    #[arg(long, default_value_t = 0)]
    pub start_frame: u32,

    /// Number of frame buffers in the decode pool
    #[arg(long, default_value_t = 8)]
    pub buffers: usize,

    /// Frames jumped by a seek-forward/seek-backward request
    #[arg(long, default_value_t = 500)]
    pub seek_step: u32,

    /// Consecutive stalls on one frame before it is dropped
    #[arg(long, default_value_t = 3)]
    pub stall_threshold: u32,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Path of the container to inspect
    pub container: PathBuf,
}
