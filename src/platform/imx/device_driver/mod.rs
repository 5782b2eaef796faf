/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Device drivers for the i.MX display path.

pub mod common;
pub mod lcdif;

pub use lcdif::{
    compute_watermarks, Config, ControllerState, FifoThresholds, Lcdif, LcdifError, Reservation,
    VblankWait, MAX_FRAMEBUFFER_BYTES,
};
