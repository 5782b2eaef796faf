/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

#![allow(dead_code)]

pub mod device_driver;

use crate::devices::display::TimingDescriptor;

/// See i.MX 8M Plus Applications Processor Reference Manual (IMX8MPRM),
/// chapter 13.8, for the LCDIF instances and their memory map.
pub struct ImxHost;

impl ImxHost {
    /// Name of the hardware device this ImxHost is compiled for.
    pub const fn soc_name() -> &'static str {
        "i.MX 8M Plus"
    }

    /// ARM-side physical address of the LCDIF instance driving the MIPI DSI
    /// bridge path.
    pub const fn lcdif1_base() -> usize {
        0x32e8_0000
    }

    /// ARM-side physical address of the LCDIF instance driving the LVDS path.
    pub const fn lcdif2_base() -> usize {
        0x32e9_0000
    }

    /// Size of one LCDIF register block.
    pub const fn lcdif_size() -> usize {
        0x1_0000
    }

    /// Block size at which the translation tables can retag memory
    /// attributes; framebuffer cache-policy ranges are aligned to this.
    pub const fn mmu_section_size() -> usize {
        2 * 1024 * 1024
    }
}

/// Fallback video modes used when no downstream device reports a timing.
pub mod mode {
    use super::TimingDescriptor;

    /// CEA-861 1080p60. The largest mode the layer fetch engine is
    /// provisioned for; the bind-time framebuffer reservation is sized
    /// against it.
    pub const DEFAULT: TimingDescriptor = TimingDescriptor {
        active_width: 1920,
        active_height: 1080,
        h_back_porch: 148,
        h_front_porch: 88,
        h_sync_len: 44,
        v_back_porch: 36,
        v_front_porch: 4,
        v_sync_len: 5,
        pixel_clock_hz: 148_500_000,
        hsync_active_low: false,
        vsync_active_low: false,
    };
}
