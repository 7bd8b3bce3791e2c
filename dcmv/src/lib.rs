#[macro_use]
mod macros;

pub mod codec;
pub mod common;
pub mod container;
pub mod player;
pub mod sink;

pub use container::{ContainerReader, FramePattern, FrameType, Packer, PackSettings};
pub use player::{Player, PlayerControls, PlayerOptions};

#[cfg(test)]
mod test;
