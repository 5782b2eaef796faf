/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Driver for the i.MX LCDIF display controller.
//!
//! The controller scans out a single DMA-backed framebuffer layer through a
//! programmable timing generator. This crate owns the register block and the
//! bind → probe → enable → disable → remove lifecycle around it; everything
//! upstream of the controller (power domains, pin muxing, clock tree setup
//! beyond the pixel clock) is expected to be done by platform init before
//! [`platform::imx::device_driver::Lcdif::probe`] runs.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::upper_case_acronyms)]

pub mod devices;
pub mod memory;
mod mm;
pub mod platform;
pub mod time;

pub use platform::imx::device_driver::{
    Config, ControllerState, Lcdif, LcdifError, Reservation, VblankWait,
};
