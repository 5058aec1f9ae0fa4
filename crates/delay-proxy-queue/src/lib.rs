//! Shared hold-time setting and the time-stamped FIFO it gates.

pub mod delay_queue;
pub mod delay_setting;
pub mod error;

pub use delay_queue::DelayQueue;
pub use delay_setting::DelaySetting;
pub use error::GuardTimeout;
