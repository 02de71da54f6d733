#![doc = include_str!("../README.md")]

mod error;

pub mod bits;
pub mod framing;
pub mod hk;
pub mod ldt;
pub mod report;
pub mod timecode;

pub use error::{Error, Result};
