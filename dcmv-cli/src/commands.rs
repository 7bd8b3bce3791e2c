use crate::args::{CodecArg, Command, InfoArgs, PackArgs, PlayArgs};
use anyhow::{anyhow, bail, Result};
use dcmv::codec::{Deflate, FrameCodec, Identity};
use dcmv::player::{Clock, MonotonicClock};
use dcmv::sink::{NullTextureSink, PacedAudioSink};
use dcmv::{ContainerReader, FramePattern, FrameType, PackSettings, Packer, Player, PlayerOptions};
use log::info;
use std::sync::Arc;

pub fn execute(command: Command) -> Result<()> {
    match command {
        Command::Pack(args) => pack(args),
        Command::Play(args) => play(args),
        Command::Info(args) => print_info(args),
    }
}

fn codec(arg: CodecArg) -> Arc<dyn FrameCodec> {
    match arg {
        CodecArg::Deflate => Arc::new(Deflate),
        CodecArg::Store => Arc::new(Identity),
    }
}

fn pack(args: PackArgs) -> Result<()> {
    let frame_type = FrameType::try_from(args.frame_type)
        .map_err(|_| anyhow!("frame type must be 0 (paletted) or 1 (macroblock)"))?;
    if args.width % 16 != 0 || args.height % 16 != 0 {
        bail!("width and height must be multiples of 16");
    }
    if !(1..=2).contains(&args.channels) {
        bail!("channel count must be 1 or 2");
    }
    if !(args.frame_rate.is_finite() && args.frame_rate > 0.0) {
        bail!("frame rate must be positive");
    }

    let settings = PackSettings {
        frame_type,
        width: args.width,
        height: args.height,
        frame_rate: args.frame_rate,
        sample_rate: args.sample_rate,
        channels: args.channels,
    };
    let pattern = FramePattern::new(&args.frame_pattern)?;
    let codec = codec(args.codec);
    let packer = Packer::new(settings, &*codec);
    packer.pack(&args.output, &pattern, &args.audio_file)?;
    Ok(())
}

fn play(args: PlayArgs) -> Result<()> {
    if args.buffers < 2 {
        bail!("--buffers must be at least 2");
    }
    if args.seek_step == 0 {
        bail!("--seek-step must be at least 1");
    }
    if args.stall_threshold == 0 {
        bail!("--stall-threshold must be at least 1");
    }

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let options = PlayerOptions {
        num_buffers: args.buffers,
        seek_step: args.seek_step,
        stall_threshold: args.stall_threshold,
        start_frame: args.start_frame,
    };
    let mut player = Player::open(
        &args.container,
        codec(args.codec),
        Arc::clone(&clock),
        Box::new(NullTextureSink),
        Box::new(PacedAudioSink::new(clock)),
        options,
    )?;
    let stats = player.run()?;
    info!(
        "{}: {} frames presented, {} dropped, {} stalls, {} audio bytes",
        args.container.display(),
        stats.frames_presented,
        stats.frames_dropped,
        stats.stalls,
        stats.audio_bytes_fed,
    );
    Ok(())
}

fn print_info(args: InfoArgs) -> Result<()> {
    let (reader, _video, _audio) = ContainerReader::open(&args.container)?;
    let header = reader.header();
    println!("{}", args.container.display());
    println!("  frame type:          {:?}", header.frame_type);
    println!("  dimensions:          {}x{}", header.width, header.height);
    println!("  frame rate:          {} fps", header.frame_rate);
    println!("  audio:               {} Hz, {} channel(s)", header.sample_rate, header.channels);
    println!("  frames:              {}", header.num_frames);
    println!("  frame size:          {:#x} bytes", header.frame_size);
    println!("  max compressed size: {:#x} bytes", header.max_compressed_size);
    println!("  audio region:        {:#x}..end", header.audio_offset);
    let (first_offset, first_len) = reader.byte_range(0);
    println!("  first frame:         {:#x} ({:#x} bytes)", first_offset, first_len);
    Ok(())
}
