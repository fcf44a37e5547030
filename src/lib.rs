pub mod aspect_preset;
pub mod compositor;
pub mod decoding;
pub mod encoding;
pub mod error_codes;
pub mod export;
pub mod frame_driver;
pub mod frame_fit;
pub mod look;
pub mod noise;
pub mod offset;
#[cfg(feature = "play")]
pub mod play;
pub mod renderer;
pub mod schema;
pub mod source;
