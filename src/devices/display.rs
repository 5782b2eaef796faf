/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Display-facing data model and the downstream sink interface.
//!
//! The controller itself only scans out pixels; what sits at the other end
//! of the link (a bridge chip, a directly attached panel, or nothing at
//! all) is abstracted behind [`interface::DisplaySink`] and resolved once,
//! at probe time.

use {
    crate::memory::{Address, Physical},
    once_cell::race::OnceBool,
    snafu::Snafu,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Framebuffer pixel layouts an allocator may hand out. Not every
/// controller supports every layout; translation happens per driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PixelFormat {
    /// 16-bit packed RGB, 5:6:5.
    Rgb565,
    /// 24-bit packed RGB, 8:8:8.
    Rgb888,
    /// 32-bit packed ARGB, 8:8:8:8.
    Argb8888,
}

/// A resolved video mode.
///
/// Produced once per probe, either by querying the downstream device or
/// from the platform mode table, and immutable afterwards.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimingDescriptor {
    pub active_width: u32,
    pub active_height: u32,
    pub h_back_porch: u32,
    pub h_front_porch: u32,
    pub h_sync_len: u32,
    pub v_back_porch: u32,
    pub v_front_porch: u32,
    pub v_sync_len: u32,
    pub pixel_clock_hz: u32,
    pub hsync_active_low: bool,
    pub vsync_active_low: bool,
}

/// Describes the framebuffer layer the controller fetches from.
///
/// Owned by the framebuffer allocator; the driver only reads it.
#[derive(Copy, Clone, Debug)]
pub struct LayerDescriptor {
    pub base_address: Address<Physical>,
    pub stride_bytes: u32,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Downstream sink operation errors.
#[derive(Debug, Snafu)]
pub enum SinkError {
    #[snafu(display("downstream device failed to attach"))]
    AttachFailed,
    #[snafu(display("downstream device has no display timing"))]
    NoTiming,
    #[snafu(display("timing rejected by downstream device"))]
    TimingRejected,
    #[snafu(display("downstream device has no backlight control"))]
    NoBacklight,
}

/// The (weak) link from the controller to its downstream device, as handed
/// to probe. Absence of a device is an ordinary configuration; a link that
/// exists but fails to resolve is not.
pub enum SinkLink<'d> {
    /// No downstream device is declared; the platform mode table is used.
    NotPresent,
    /// The declared link resolved to a live device.
    Resolved(&'d mut dyn interface::DisplaySink),
    /// The declared link failed to resolve.
    Broken,
}

/// Display sink interfaces.
pub mod interface {
    use super::*;

    /// A downstream timing source and (optional) backlight: a bridge chip
    /// or a directly attached panel. All dispatch goes through this trait;
    /// the controller never inspects what is on the other side.
    pub trait DisplaySink {
        /// Bring up the link to the device.
        fn attach(&mut self) -> Result<(), SinkError>;

        /// Query the device's resolved display timing.
        fn display_timing(&self) -> Result<TimingDescriptor, SinkError>;

        /// Ask the device whether it can operate with the proposed timing.
        fn check_timing(&self, timing: &TimingDescriptor) -> Result<(), SinkError>;

        /// Set the backlight level, in percent.
        fn set_backlight(&mut self, percent: u8) -> Result<(), SinkError>;
    }
}

/// A directly attached panel with one fixed mode.
///
/// The simplest [`interface::DisplaySink`]: it reports its own mode, accepts
/// only that mode, and records the last requested backlight level.
pub struct FixedModePanel {
    timing: TimingDescriptor,
    backlight_percent: Option<u8>,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

/// Set once the framebuffer has been made write-back cacheable: from then
/// on every frame update must be followed by explicit cache maintenance
/// before the DMA engine can see it.
static FRAMEBUFFER_NEEDS_FLUSH: OnceBool = OnceBool::new();

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// Record that framebuffer writes require explicit cache maintenance.
/// One-shot; later calls are no-ops.
pub fn publish_flush_required() {
    let _ = FRAMEBUFFER_NEEDS_FLUSH.set(true);
}

/// Whether the graphics subsystem must flush the cache before each DMA
/// refresh. False until a controller has applied its cache policy.
pub fn framebuffer_needs_flush() -> bool {
    FRAMEBUFFER_NEEDS_FLUSH.get().unwrap_or(false)
}

impl PixelFormat {
    /// Bytes occupied by one pixel in memory.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Argb8888 => 4,
        }
    }
}

impl TimingDescriptor {
    /// Check the descriptor invariants: a visible area and a running pixel
    /// clock. Porch and sync-length fields may legitimately be zero.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.active_width == 0 || self.active_height == 0 {
            return Err("active area must be non-zero");
        }
        if self.pixel_clock_hz == 0 {
            return Err("pixel clock must be non-zero");
        }

        Ok(())
    }
}

impl FixedModePanel {
    /// Create an instance around the panel's one supported mode.
    pub const fn new(timing: TimingDescriptor) -> Self {
        Self {
            timing,
            backlight_percent: None,
        }
    }

    /// Last backlight level requested on this panel, if any.
    pub fn backlight_percent(&self) -> Option<u8> {
        self.backlight_percent
    }
}

impl interface::DisplaySink for FixedModePanel {
    fn attach(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn display_timing(&self) -> Result<TimingDescriptor, SinkError> {
        Ok(self.timing)
    }

    fn check_timing(&self, timing: &TimingDescriptor) -> Result<(), SinkError> {
        if *timing == self.timing {
            Ok(())
        } else {
            Err(SinkError::TimingRejected)
        }
    }

    fn set_backlight(&mut self, percent: u8) -> Result<(), SinkError> {
        self.backlight_percent = Some(percent);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
