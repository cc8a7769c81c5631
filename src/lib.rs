//! Host-side library for driving a CC-Debugger USB probe: opening the
//! device, entering/leaving target debug mode, and the flash
//! erase/program/verify pipeline for CC24xx/CC25xx/CC253x targets.
//!
//! The bulk of the crate is organized bottom-up:
//!
//! - [`transport`] (C1) owns the USB device handle and the raw
//!   control/bulk transfer primitives, generic over a [`transport::Transport`]
//!   trait so the rest of the stack can be exercised against an in-memory
//!   fake.
//! - [`probe`] (C2) drives the CC-Debugger's own vendor requests:
//!   firmware identification, speed, reset, and debug entry/exit.
//! - [`target`] (C3) synthesizes the 8051 instruction streams and short
//!   opcodes that read and write the target's xdata address space.
//! - [`dma`] and [`crc`] (C4) implement the DMA descriptor model and the
//!   CRC-16 used to verify a flash write.
//! - [`engine`] (C4) composes C2/C3/C4 into `erase`, `target_info`,
//!   `write_flash` and `verify_flash`.
//! - [`hex`] (C5) parses Intel-HEX input into a flash image.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod crc;
pub mod dma;
pub mod engine;
pub mod error;
#[cfg(test)]
mod fake_transport;
pub mod hex;
pub mod probe;
pub mod target;
pub mod transport;

pub use crate::error::{Error, Result};
