//! Codec-configuration bitstream decoders: AAC AudioSpecificConfig, MPEG-4 Visual object/VOL
//! headers, and H.264 parameter sets.

pub mod aac;
pub mod avc;
pub mod mpeg4video;
