/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */
pub mod display;

pub use display::{LayerDescriptor, PixelFormat, SinkLink, TimingDescriptor};
