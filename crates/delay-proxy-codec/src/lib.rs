//! CRC-16 and length-prefixed frame codec for the delay proxy wire protocol.

pub mod crc16;
pub mod frame;

pub use crc16::crc16;
pub use frame::{
    decode, encode, FrameError, HEADER_SIZE, MAX_BODY_LEN, MAX_FRAME_LEN, MIN_BODY_LEN,
};
