/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 *
 * i.MX LCDIF display controller (the LCDIFv3 block of the i.MX 8M Plus and
 * i.MX 93). Register layout per the i.MX 8M Plus Applications Processor
 * Reference Manual (IMX8MPRM), chapter 13.8.
 */

use {
    super::common::{BoundedUsize, MMIODerefWrapper},
    crate::{
        devices::display::{
            self, interface::DisplaySink, LayerDescriptor, PixelFormat, SinkLink, TimingDescriptor,
        },
        memory::{
            mmu::{
                interface::MemoryManagement, AccessPermissions, AttributeFields, MemAttributes,
                MemoryRegion, MmuError,
            },
            Address, Physical, Virtual,
        },
        platform::imx::{mode, ImxHost},
        time::SpinWait,
    },
    embedded_hal::delay::DelayNs,
    log::{debug, warn},
    snafu::Snafu,
    static_assertions::const_assert,
    tock_registers::{
        fields::FieldValue,
        interfaces::{ReadWriteable, Readable, Writeable},
        register_bitfields, register_structs,
        registers::{ReadWrite, WriteOnly},
    },
};

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

register_bitfields! {
    u32,

    /// Control Register. The SET/CLR/TOG companions at the following three
    /// offsets take the same layout.
    CTRL [
        /// Soft reset, active high. Held set out of power-on reset.
        SW_RESET OFFSET(31) NUMBITS(1) [],

        /// Invert the polarity of all data signals.
        NEG OFFSET(4) NUMBITS(1) [],

        /// Invert the pixel clock edge the data is launched on.
        INV_PXCK OFFSET(3) NUMBITS(1) [],

        /// Data enable is active low when set.
        INV_DE OFFSET(2) NUMBITS(1) [],

        /// Vertical sync is active low when set.
        INV_VS OFFSET(1) NUMBITS(1) [],

        /// Horizontal sync is active low when set.
        INV_HS OFFSET(0) NUMBITS(1) []
    ],

    /// Display Parameter Register.
    DISP_PARA [
        /// Master display output enable.
        DISP_ON OFFSET(31) NUMBITS(1) [],

        SWAP_EN OFFSET(30) NUMBITS(1) [],

        /// Output bus mapping.
        LINE_PATTERN OFFSET(26) NUMBITS(4) [
            /// 24-bit packed RGB888 (or YUV444) on the bus.
            Rgb888OrYuv444 = 0
        ],

        DISP_MODE OFFSET(24) NUMBITS(2) [
            Normal = 0
        ],

        /// Background color shown outside the active layer.
        BGND_R OFFSET(16) NUMBITS(8) [],
        BGND_G OFFSET(8) NUMBITS(8) [],
        BGND_B OFFSET(0) NUMBITS(8) []
    ],

    /// Display Size Register: the active area scanned out per frame.
    DISP_SIZE [
        DELTA_Y OFFSET(16) NUMBITS(16) [],
        DELTA_X OFFSET(0) NUMBITS(16) []
    ],

    /// Horizontal Sync Parameter Register, in pixel clocks.
    HSYN_PARA [
        BP_H OFFSET(16) NUMBITS(16) [],
        FP_H OFFSET(0) NUMBITS(16) []
    ],

    /// Vertical Sync Parameter Register, in lines.
    VSYN_PARA [
        BP_V OFFSET(16) NUMBITS(16) [],
        FP_V OFFSET(0) NUMBITS(16) []
    ],

    /// Sync pulse widths.
    VSYN_HSYN_WIDTH [
        PW_V OFFSET(16) NUMBITS(16) [],
        PW_H OFFSET(0) NUMBITS(16) []
    ],

    /// Domain 0 interrupt status; write-1-clear.
    INT_STATUS_D0 [
        FIFO_EMPTY OFFSET(24) NUMBITS(1) [],
        DMA_DONE OFFSET(16) NUMBITS(1) [],
        DMA_ERR OFFSET(8) NUMBITS(1) [],

        /// Latches at the start of each vertical blanking interval.
        VS_BLANK OFFSET(2) NUMBITS(1) [],

        UNDERRUN OFFSET(1) NUMBITS(1) [],
        VSYNC OFFSET(0) NUMBITS(1) []
    ],

    /// Domain 1 interrupt status/enable. The plane-panic condition is wired
    /// to the NoC/QoS arbiter, not the interrupt controller; enabling it
    /// never raises an interrupt towards the CPU.
    INT_D1 [
        PLANE_PANIC OFFSET(0) NUMBITS(1) []
    ],

    /// Layer descriptor word 1: layer size.
    CTRLDESCL0_1 [
        HEIGHT OFFSET(16) NUMBITS(16) [],
        WIDTH OFFSET(0) NUMBITS(16) []
    ],

    /// Layer descriptor word 3: AXI fetch sizes and the line pitch.
    CTRLDESCL0_3 [
        P_SIZE OFFSET(20) NUMBITS(3) [],
        T_SIZE OFFSET(16) NUMBITS(2) [],
        PITCH OFFSET(0) NUMBITS(16) []
    ],

    /// Layer descriptor word 5: fetch enable, shadow load and pixel format.
    CTRLDESCL0_5 [
        /// Layer DMA enable.
        EN OFFSET(31) NUMBITS(1) [],

        /// Latch descriptor writes into the working set at the next frame
        /// boundary instead of immediately.
        SHADOW_LOAD_EN OFFSET(30) NUMBITS(1) [],

        /// Framebuffer pixel format.
        BPP OFFSET(24) NUMBITS(4) [
            Bpp16Rgb565 = 0x4,
            Bpp16Argb1555 = 0x5,
            Bpp16Argb4444 = 0x6,
            Bpp24Rgb888 = 0x8,
            Bpp32Argb8888 = 0x9,
            Bpp32Abgr8888 = 0xa
        ],

        YUV_FORMAT OFFSET(14) NUMBITS(2) []
    ],

    /// FIFO panic thresholds, in units of one 128-bit FIFO word, as
    /// inclusive indexes (0 ..= depth - 1).
    PANIC0_THRES [
        THRES_HIGH OFFSET(16) NUMBITS(9) [],
        THRES_LOW OFFSET(0) NUMBITS(9) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x000 => CTRL: ReadWrite<u32, CTRL::Register>),
        (0x004 => CTRL_SET: WriteOnly<u32, CTRL::Register>),
        (0x008 => CTRL_CLR: WriteOnly<u32, CTRL::Register>),
        (0x00c => CTRL_TOG: WriteOnly<u32, CTRL::Register>),
        (0x010 => DISP_PARA: ReadWrite<u32, DISP_PARA::Register>),
        (0x014 => DISP_SIZE: ReadWrite<u32, DISP_SIZE::Register>),
        (0x018 => HSYN_PARA: ReadWrite<u32, HSYN_PARA::Register>),
        (0x01c => VSYN_PARA: ReadWrite<u32, VSYN_PARA::Register>),
        (0x020 => VSYN_HSYN_WIDTH: ReadWrite<u32, VSYN_HSYN_WIDTH::Register>),
        (0x024 => INT_STATUS_D0: ReadWrite<u32, INT_STATUS_D0::Register>),
        (0x028 => INT_ENABLE_D0: ReadWrite<u32, INT_STATUS_D0::Register>),
        (0x02c => INT_STATUS_D1: ReadWrite<u32, INT_D1::Register>),
        (0x030 => INT_ENABLE_D1: ReadWrite<u32, INT_D1::Register>),
        (0x034 => _reserved1),
        (0x200 => CTRLDESCL0_1: ReadWrite<u32, CTRLDESCL0_1::Register>),
        (0x204 => _reserved2),
        (0x208 => CTRLDESCL0_3: ReadWrite<u32, CTRLDESCL0_3::Register>),
        (0x20c => CTRLDESCL_LOW0_4: ReadWrite<u32>),
        (0x210 => CTRLDESCL_HIGH0_4: ReadWrite<u32>),
        (0x214 => CTRLDESCL0_5: ReadWrite<u32, CTRLDESCL0_5::Register>),
        (0x218 => _reserved3),
        (0x300 => PANIC0_THRES: ReadWrite<u32, PANIC0_THRES::Register>),
        (0x304 => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;

/// Largest mode the layer fetch engine is provisioned for.
const MAX_WIDTH: usize = 1920;
const MAX_HEIGHT: usize = 1080;

/// Backlight level requested on the downstream device after enable.
const DEFAULT_BACKLIGHT_PERCENT: u8 = 80;

/// Vblank wait budget: up to one million polls, 1 µs apart. Two frame
/// periods of the slowest supported mode fit comfortably inside it.
const VBLANK_WAIT: SpinWait = SpinWait::new(1_000_000, 1);

// The PITCH field is 16 bits; every supported row length must encode.
const_assert!(MAX_WIDTH * 4 <= 0xffff);
// The threshold fields hold a 9-bit inclusive FIFO index.
const_assert!(FIFO_MAX_INDEX <= 0x1ff);

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Layer FIFO depth: 8 KiB organized as 512 words of 128 bits.
pub const FIFO_DEPTH: usize = 512;

/// The threshold registers address FIFO words by inclusive index.
pub const FIFO_MAX_INDEX: usize = FIFO_DEPTH - 1;

/// Bind-time worst case framebuffer need: the largest mode at 32 bpp,
/// double-buffered. Bind cannot probe the panel yet, so it over-allocates.
pub const MAX_FRAMEBUFFER_BYTES: usize = MAX_WIDTH * MAX_HEIGHT * 4 * 2;

/// Driver errors.
#[derive(Debug, Snafu)]
pub enum LcdifError {
    /// Configuration defect; fatal to the probe, never retried.
    #[snafu(display("controller base address is not configured"))]
    MissingBaseAddress,

    /// Configuration defect; the layer fetch engine has no encoding for
    /// the requested format.
    #[snafu(display("unsupported pixel format {:?}", format))]
    UnsupportedFormat { format: PixelFormat },

    /// Configuration defect in the negotiated or configured timing.
    #[snafu(display("invalid display timing: {}", reason))]
    InvalidTiming { reason: &'static str },

    /// Configuration defect in the handed layer descriptor.
    #[snafu(display("invalid framebuffer layer: {}", reason))]
    InvalidLayer { reason: &'static str },

    /// A declared downstream link did not resolve to a live device. The
    /// controller stays bound; a fresh probe may succeed.
    #[snafu(display("downstream link did not resolve"))]
    BrokenLink,

    /// The downstream device refused to attach. Retryable like
    /// [`LcdifError::BrokenLink`].
    #[snafu(display("failed to attach downstream device"))]
    AttachFailed,

    /// The downstream device rejected the proposed timing or produced none.
    /// Retryable like [`LcdifError::BrokenLink`].
    #[snafu(display("timing negotiation with downstream device failed"))]
    TimingNegotiationFailed,

    #[snafu(display("framebuffer reservation failed: {}", reason))]
    ReservationFailed { reason: &'static str },

    /// Lifecycle misuse; the transition was refused and no hardware state
    /// was touched.
    #[snafu(display("cannot {} while in state {:?}", operation, from))]
    InvalidTransition {
        from: ControllerState,
        operation: &'static str,
    },

    #[snafu(display("failed to retag framebuffer memory: {}", source))]
    CachePolicy { source: MmuError },
}

/// Lifecycle of one physical controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerState {
    Unbound,
    Bound,
    Probed,
    Enabled,
    Disabled,
    Removed,
}

/// Outcome of the vblank synchronization point in front of a disable.
///
/// A timeout is degradation, not failure: teardown proceeds regardless, it
/// just could not be placed in the blanking interval.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VblankWait {
    Synced,
    TimedOut,
}

/// Static configuration, resolved by platform init before probe.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// CPU-visible base of the controller's register block. The driver
    /// assumes MMIO is identity-mapped or already mapped by the platform.
    pub reg_base: Option<Address<Virtual>>,

    /// FIFO panic threshold low ratio as (mul, div).
    pub thres_low: Option<(u32, u32)>,

    /// FIFO panic threshold high ratio as (mul, div).
    pub thres_high: Option<(u32, u32)>,
}

/// One watermark level expressed as a fraction of the FIFO.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ratio {
    mul: u32,
    div: u32,
}

/// The pair of FIFO panic watermark ratios.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FifoThresholds {
    low: Ratio,
    high: Ratio,
}

/// A bind-time framebuffer reservation, owned by the external allocator.
#[derive(Copy, Clone, Debug)]
pub struct Reservation {
    pub base: Address<Physical>,
    pub size: usize,
}

/// Collaborator interfaces supplied by platform init.
pub mod interface {
    use super::Reservation;

    /// Reserve/release framebuffer memory. The driver never writes pixel
    /// data; it only needs the region's location and size.
    pub trait FramebufferAllocator {
        fn reserve(&mut self, bytes: usize) -> Result<Reservation, &'static str>;
        fn release(&mut self, reservation: Reservation);
    }

    /// The pixel clock feeding the timing generator.
    pub trait PixelClock {
        fn set_rate_hz(&mut self, hz: u32);
    }
}

/// Driver for one LCDIF instance.
///
/// Transitions are not reentrant; `&mut self` makes one owning context per
/// physical controller a compile-time property.
pub struct Lcdif<'d> {
    config: Config,
    thresholds: FifoThresholds,
    state: ControllerState,
    registers: Option<Registers>,
    reservation: Option<Reservation>,
    sink: Option<&'d mut dyn DisplaySink>,
    timing: Option<TimingDescriptor>,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl Ratio {
    /// Validate one configured (mul, div) pair.
    pub fn new(mul: u32, div: u32) -> Result<Ratio, &'static str> {
        if div == 0 {
            return Err("divisor must be non-zero");
        }
        if mul == 0 || mul > div {
            return Err("multiplier must be in 1..=div");
        }

        Ok(Ratio { mul, div })
    }
}

impl FifoThresholds {
    const DEFAULT_LOW: Ratio = Ratio { mul: 1, div: 3 };
    const DEFAULT_HIGH: Ratio = Ratio { mul: 2, div: 3 };

    /// Build the threshold pair from optional configuration values.
    ///
    /// Each pair is validated on its own; a malformed low ratio does not
    /// invalidate a good high ratio or vice versa. Invalid or absent pairs
    /// take the suggested defaults of 1/3 and 2/3 of the FIFO.
    pub fn from_config(low: Option<(u32, u32)>, high: Option<(u32, u32)>) -> Self {
        let mut thresholds = Self::default();

        if let Some((mul, div)) = low {
            match Ratio::new(mul, div) {
                Ok(ratio) => thresholds.low = ratio,
                Err(reason) => debug!("thres-low {}/{} ignored: {}", mul, div, reason),
            }
        }

        if let Some((mul, div)) = high {
            match Ratio::new(mul, div) {
                Ok(ratio) => thresholds.high = ratio,
                Err(reason) => debug!("thres-high {}/{} ignored: {}", mul, div, reason),
            }
        }

        thresholds
    }
}

impl Default for FifoThresholds {
    fn default() -> Self {
        Self {
            low: Self::DEFAULT_LOW,
            high: Self::DEFAULT_HIGH,
        }
    }
}

/// Derive the panic watermark levels from the threshold ratios.
///
/// Levels are inclusive FIFO word indexes, so the full FIFO corresponds to
/// depth - 1. Rounding is up: a low watermark one word too high is a margin,
/// one word too low is an underrun window.
pub fn compute_watermarks(
    thresholds: &FifoThresholds,
) -> (
    BoundedUsize<{ FIFO_MAX_INDEX }>,
    BoundedUsize<{ FIFO_MAX_INDEX }>,
) {
    let level = |ratio: &Ratio| -> usize {
        // mul <= div keeps the result within the FIFO index range; the
        // product needs the wider type, not the result.
        ((FIFO_MAX_INDEX as u64 * ratio.mul as u64).div_ceil(ratio.div as u64)) as usize
    };

    (
        BoundedUsize::new(level(&thresholds.low)),
        BoundedUsize::new(level(&thresholds.high)),
    )
}

impl<'d> Lcdif<'d> {
    pub const COMPATIBLE: &'static str = "i.MX LCDIF";

    /// Create an instance. No hardware is touched until probe.
    pub fn new(config: Config) -> Self {
        let thresholds = FifoThresholds::from_config(config.thres_low, config.thres_high);

        Self {
            config,
            thresholds,
            state: ControllerState::Unbound,
            registers: None,
            reservation: None,
            sink: None,
            timing: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// The timing the controller was probed with, if any.
    pub fn timing(&self) -> Option<&TimingDescriptor> {
        self.timing.as_ref()
    }

    /// Unbound → Bound: reserve the worst-case framebuffer.
    ///
    /// The downstream device cannot be queried this early, so the
    /// reservation is sized for the largest supported mode at 32 bpp,
    /// double-buffered. No hardware access occurs.
    pub fn bind(
        &mut self,
        fb_alloc: &mut dyn interface::FramebufferAllocator,
    ) -> Result<(), LcdifError> {
        if self.state != ControllerState::Unbound {
            return Err(LcdifError::InvalidTransition {
                from: self.state,
                operation: "bind",
            });
        }

        let reservation = fb_alloc
            .reserve(MAX_FRAMEBUFFER_BYTES)
            .map_err(|reason| LcdifError::ReservationFailed { reason })?;

        debug!(
            "{}: bound, reserved {} bytes at {}",
            Self::COMPATIBLE,
            reservation.size,
            reservation.base
        );

        self.reservation = Some(reservation);
        self.state = ControllerState::Bound;

        Ok(())
    }

    /// Bound → Probed: negotiate a timing and configure the controller.
    ///
    /// On a negotiation failure the controller stays Bound and the probe
    /// may be retried with a fresh [`SinkLink`]. Configuration defects
    /// (missing base address, unsupported format, invalid timing) are not
    /// retryable.
    pub fn probe(
        &mut self,
        layer: &LayerDescriptor,
        sink: SinkLink<'d>,
        pixel_clock: &mut dyn interface::PixelClock,
        mmu: &mut dyn MemoryManagement,
    ) -> Result<(), LcdifError> {
        if self.state != ControllerState::Bound {
            return Err(LcdifError::InvalidTransition {
                from: self.state,
                operation: "probe",
            });
        }

        let base = self.config.reg_base.ok_or(LcdifError::MissingBaseAddress)?;

        let mut sink = match sink {
            SinkLink::NotPresent => None,
            SinkLink::Resolved(device) => Some(device),
            SinkLink::Broken => return Err(LcdifError::BrokenLink),
        };

        let timing = match sink.as_deref_mut() {
            Some(device) => Self::negotiate_timing(device)?,
            None => {
                debug!(
                    "{}: no downstream device, using mode table",
                    Self::COMPATIBLE
                );
                mode::DEFAULT
            }
        };

        // Everything is validated before the first register write.
        timing
            .validate()
            .map_err(|reason| LcdifError::InvalidTiming { reason })?;
        Self::validate_layer(layer, &timing, self.reservation.as_ref())?;

        // SAFETY: the configured base address maps this controller's
        // register block, and `self` is its only owner.
        let registers = unsafe { Registers::new(base) };

        pixel_clock.set_rate_hz(timing.pixel_clock_hz);

        // Take the controller out of soft reset.
        registers.CTRL_CLR.write(CTRL::SW_RESET::SET);

        self.enable_plane_panic(&registers);
        Self::program_mode(&registers, &timing);
        Self::set_bus_format(&registers);
        Self::set_pixel_format(&registers, layer.pixel_format)?;
        Self::program_layer(&registers, layer);

        self.apply_cache_policy(mmu)?;

        debug!(
            "{}: probed {}x{} @ {} Hz",
            Self::COMPATIBLE,
            timing.active_width,
            timing.active_height,
            timing.pixel_clock_hz
        );

        self.registers = Some(registers);
        self.timing = Some(timing);
        self.sink = sink;
        self.state = ControllerState::Probed;

        Ok(())
    }

    /// Probed → Enabled: start scan-out.
    ///
    /// Shadow load is armed before layer DMA so the first frame latches a
    /// complete descriptor; display output is asserted last, once DMA is
    /// primed, so no blank frame reaches the panel.
    pub fn enable(&mut self) -> Result<(), LcdifError> {
        let registers = match (self.state, self.registers.as_ref()) {
            (ControllerState::Probed, Some(registers)) => registers,
            _ => {
                return Err(LcdifError::InvalidTransition {
                    from: self.state,
                    operation: "enable",
                })
            }
        };

        registers
            .CTRLDESCL0_5
            .modify(CTRLDESCL0_5::SHADOW_LOAD_EN::SET);
        registers.CTRLDESCL0_5.modify(CTRLDESCL0_5::EN::SET);
        registers.DISP_PARA.modify(DISP_PARA::DISP_ON::SET);

        self.state = ControllerState::Enabled;

        // Light the backlight if the downstream device has one. Purely
        // best-effort; scan-out is already running.
        match self.sink.as_deref_mut() {
            Some(device) => {
                if let Err(err) = device.set_backlight(DEFAULT_BACKLIGHT_PERCENT) {
                    warn!("{}: backlight not enabled: {}", Self::COMPATIBLE, err);
                }
            }
            None => debug!("{}: no downstream backlight", Self::COMPATIBLE),
        }

        Ok(())
    }

    /// Enabled → Disabled: stop scan-out at a frame boundary.
    ///
    /// Arms the one-shot vblank latch and polls it with a bounded budget so
    /// the layer is switched off inside the blanking interval rather than
    /// mid-frame. If the latch never fires, teardown proceeds anyway; a
    /// display driver must never hang its caller on the way down.
    pub fn disable<D: DelayNs>(&mut self, delay: &mut D) -> Result<VblankWait, LcdifError> {
        let registers = match (self.state, self.registers.as_ref()) {
            (ControllerState::Enabled, Some(registers)) => registers,
            _ => {
                return Err(LcdifError::InvalidTransition {
                    from: self.state,
                    operation: "disable",
                })
            }
        };

        // Clear the stale latch (write-1-clear), let one poll interval pass,
        // then wait for the next vertical blanking interval to begin.
        registers.INT_STATUS_D0.write(INT_STATUS_D0::VS_BLANK::SET);
        delay.delay_us(1);

        let outcome = match VBLANK_WAIT.wait_for(delay, || {
            registers.INT_STATUS_D0.is_set(INT_STATUS_D0::VS_BLANK)
        }) {
            Ok(()) => VblankWait::Synced,
            Err(_) => {
                warn!(
                    "{}: no vblank within {} µs, disabling anyway",
                    Self::COMPATIBLE,
                    VBLANK_WAIT.budget_us()
                );
                VblankWait::TimedOut
            }
        };

        // Layer DMA off first, then the display output.
        registers.CTRLDESCL0_5.modify(CTRLDESCL0_5::EN::CLEAR);
        registers.DISP_PARA.modify(DISP_PARA::DISP_ON::CLEAR);

        self.state = ControllerState::Disabled;

        Ok(outcome)
    }

    /// Disabled → Removed: give back everything bind and probe acquired.
    /// Terminal; the instance accepts no further transitions.
    pub fn remove(
        &mut self,
        fb_alloc: &mut dyn interface::FramebufferAllocator,
    ) -> Result<(), LcdifError> {
        if self.state != ControllerState::Disabled {
            return Err(LcdifError::InvalidTransition {
                from: self.state,
                operation: "remove",
            });
        }

        if self.sink.take().is_some() {
            debug!("{}: released downstream device", Self::COMPATIBLE);
        }

        if let Some(reservation) = self.reservation.take() {
            fb_alloc.release(reservation);
        }

        self.registers = None;
        self.state = ControllerState::Removed;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl<'d> Lcdif<'d> {
    /// Run the negotiation protocol against a resolved downstream device:
    /// attach, query its resolved timing, then have it confirm the mode the
    /// controller is about to program.
    fn negotiate_timing(device: &mut dyn DisplaySink) -> Result<TimingDescriptor, LcdifError> {
        device.attach().map_err(|_| LcdifError::AttachFailed)?;

        let timing = device
            .display_timing()
            .map_err(|_| LcdifError::TimingNegotiationFailed)?;

        device
            .check_timing(&timing)
            .map_err(|_| LcdifError::TimingNegotiationFailed)?;

        Ok(timing)
    }

    /// Cross-check the handed layer against the negotiated mode and the
    /// bind-time reservation.
    fn validate_layer(
        layer: &LayerDescriptor,
        timing: &TimingDescriptor,
        reservation: Option<&Reservation>,
    ) -> Result<(), LcdifError> {
        let min_stride = timing.active_width * layer.pixel_format.bytes_per_pixel();

        if layer.stride_bytes < min_stride {
            return Err(LcdifError::InvalidLayer {
                reason: "stride smaller than one active line",
            });
        }
        if layer.stride_bytes > 0xffff {
            return Err(LcdifError::InvalidLayer {
                reason: "stride does not fit the pitch field",
            });
        }
        if layer.width < timing.active_width || layer.height < timing.active_height {
            return Err(LcdifError::InvalidLayer {
                reason: "layer smaller than the active area",
            });
        }

        if let Some(reservation) = reservation {
            let footprint = layer.stride_bytes as usize * layer.height as usize;
            let end = Address::<Physical>::new(reservation.base.as_usize() + reservation.size);
            let region = MemoryRegion::new(reservation.base, end);

            if !region.contains(layer.base_address)
                || layer.base_address - reservation.base + footprint > reservation.size
            {
                return Err(LcdifError::InvalidLayer {
                    reason: "layer outside the bound reservation",
                });
            }
        }

        Ok(())
    }

    /// Program the FIFO panic thresholds and let the hardware prioritize
    /// fetches once the FIFO drains below the low watermark.
    fn enable_plane_panic(&self, registers: &Registers) {
        let (low, high) = compute_watermarks(&self.thresholds);

        registers.PANIC0_THRES.write(
            PANIC0_THRES::THRES_LOW.val(low.get() as u32)
                + PANIC0_THRES::THRES_HIGH.val(high.get() as u32),
        );

        registers.INT_ENABLE_D1.write(INT_D1::PLANE_PANIC::SET);
    }

    /// Write display timings, layer geometry and sync polarities. The
    /// registers in this subset carry no ordering dependency between each
    /// other; they only must be written while layer DMA is off, which the
    /// lifecycle guarantees.
    fn program_mode(registers: &Registers, timing: &TimingDescriptor) {
        registers.DISP_SIZE.write(
            DISP_SIZE::DELTA_Y.val(timing.active_height) + DISP_SIZE::DELTA_X.val(timing.active_width),
        );

        registers
            .HSYN_PARA
            .write(HSYN_PARA::BP_H.val(timing.h_back_porch) + HSYN_PARA::FP_H.val(timing.h_front_porch));

        registers
            .VSYN_PARA
            .write(VSYN_PARA::BP_V.val(timing.v_back_porch) + VSYN_PARA::FP_V.val(timing.v_front_porch));

        registers.VSYN_HSYN_WIDTH.write(
            VSYN_HSYN_WIDTH::PW_V.val(timing.v_sync_len) + VSYN_HSYN_WIDTH::PW_H.val(timing.h_sync_len),
        );

        registers.CTRLDESCL0_1.write(
            CTRLDESCL0_1::HEIGHT.val(timing.active_height) + CTRLDESCL0_1::WIDTH.val(timing.active_width),
        );

        let hsync = if timing.hsync_active_low {
            CTRL::INV_HS::SET
        } else {
            CTRL::INV_HS::CLEAR
        };
        let vsync = if timing.vsync_active_low {
            CTRL::INV_VS::SET
        } else {
            CTRL::INV_VS::CLEAR
        };

        // Data enable and pixel clock polarity stay normal for the SEC
        // MIPI DSI path.
        registers
            .CTRL
            .modify(hsync + vsync + CTRL::INV_PXCK::CLEAR + CTRL::INV_DE::CLEAR);
    }

    /// The output bus format is fixed at 24-bit packed RGB in normal mode;
    /// only the framebuffer side is format-configurable.
    fn set_bus_format(registers: &Registers) {
        registers.DISP_PARA.modify(
            DISP_PARA::LINE_PATTERN::Rgb888OrYuv444 + DISP_PARA::DISP_MODE::Normal,
        );
    }

    /// Translate an abstract pixel format into the fetch engine's BPP code.
    fn map_format(
        format: PixelFormat,
    ) -> Result<FieldValue<u32, CTRLDESCL0_5::Register>, LcdifError> {
        match format {
            PixelFormat::Rgb565 => Ok(CTRLDESCL0_5::BPP::Bpp16Rgb565),
            PixelFormat::Argb8888 => Ok(CTRLDESCL0_5::BPP::Bpp32Argb8888),
            _ => Err(LcdifError::UnsupportedFormat { format }),
        }
    }

    /// Apply the mapped format to the layer descriptor without disturbing
    /// its other fields.
    fn set_pixel_format(registers: &Registers, format: PixelFormat) -> Result<(), LcdifError> {
        let code = Self::map_format(format)?;

        // A pending shadow load here means someone reconfigured the layer
        // without flushing it first; caller-ordering bug.
        debug_assert!(
            !registers.CTRLDESCL0_5.is_set(CTRLDESCL0_5::SHADOW_LOAD_EN),
            "format change with a shadow load pending"
        );

        registers
            .CTRLDESCL0_5
            .modify(code + CTRLDESCL0_5::YUV_FORMAT.val(0));

        Ok(())
    }

    /// Point the layer fetch engine at the framebuffer.
    fn program_layer(registers: &Registers, layer: &LayerDescriptor) {
        registers
            .CTRLDESCL_LOW0_4
            .set(layer.base_address.as_usize() as u32);

        registers.CTRLDESCL0_3.write(
            CTRLDESCL0_3::P_SIZE.val(1)
                + CTRLDESCL0_3::T_SIZE.val(1)
                + CTRLDESCL0_3::PITCH.val(layer.stride_bytes),
        );
    }

    /// Make the framebuffer write-back cacheable and publish that frame
    /// updates now require explicit cache maintenance before scan-out sees
    /// them. The per-frame flush itself is the graphics subsystem's duty.
    fn apply_cache_policy(&self, mmu: &mut dyn MemoryManagement) -> Result<(), LcdifError> {
        let reservation = match self.reservation.as_ref() {
            Some(reservation) => reservation,
            None => return Ok(()),
        };

        let section = ImxHost::mmu_section_size();
        let start = reservation.base.align_down(section);
        let end = (reservation.base + reservation.size).align_up(section);

        mmu.set_region_attributes(
            MemoryRegion::new(start, end),
            AttributeFields {
                mem_attributes: MemAttributes::CacheableDRAM,
                acc_perms: AccessPermissions::ReadWrite,
                execute_never: true,
            },
        )
        .map_err(|source| LcdifError::CachePolicy { source })?;

        display::publish_flush_required();

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::devices::display::{framebuffer_needs_flush, FixedModePanel},
        core::ptr::{read_volatile, write_volatile},
    };

    // Register offsets, mirrored from the register map above.
    const CTRL_OFF: usize = 0x000;
    const CTRL_CLR_OFF: usize = 0x008;
    const DISP_PARA_OFF: usize = 0x010;
    const DISP_SIZE_OFF: usize = 0x014;
    const HSYN_PARA_OFF: usize = 0x018;
    const VSYN_PARA_OFF: usize = 0x01c;
    const VSYN_HSYN_WIDTH_OFF: usize = 0x020;
    const INT_STATUS_D0_OFF: usize = 0x024;
    const INT_ENABLE_D1_OFF: usize = 0x030;
    const CTRLDESCL0_1_OFF: usize = 0x200;
    const CTRLDESCL0_3_OFF: usize = 0x208;
    const CTRLDESCL_LOW0_4_OFF: usize = 0x20c;
    const CTRLDESCL0_5_OFF: usize = 0x214;
    const PANIC0_THRES_OFF: usize = 0x300;

    const RAM_SIZE: usize = 0x1000;

    /// The controller's register block emulated as plain zeroed memory.
    ///
    /// Plain memory has no write-1-clear or set/clear-port semantics; tests
    /// that depend on those drive the emulated latch through the injected
    /// delay hook instead.
    #[repr(C, align(4096))]
    struct RegisterRam([u8; RAM_SIZE]);

    struct Harness {
        ram: Box<RegisterRam>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ram: Box::new(RegisterRam([0; RAM_SIZE])),
            }
        }

        fn base(&self) -> Address<Virtual> {
            Address::new(self.ram.0.as_ptr() as usize)
        }

        fn read32(&self, offset: usize) -> u32 {
            unsafe { read_volatile(self.ram.0.as_ptr().add(offset) as *const u32) }
        }

        fn status_d0_ptr(&self) -> *mut u32 {
            unsafe { self.ram.0.as_ptr().add(INT_STATUS_D0_OFF) as *mut u32 }
        }

        fn is_all_zero(&self) -> bool {
            self.ram.0.iter().all(|byte| *byte == 0)
        }

        fn config(&self) -> Config {
            Config {
                reg_base: Some(self.base()),
                ..Default::default()
            }
        }
    }

    const FB_BASE: usize = 0x8000_0000;

    struct TestAlloc {
        last_request: Option<usize>,
        released: bool,
    }

    impl TestAlloc {
        fn new() -> Self {
            Self {
                last_request: None,
                released: false,
            }
        }
    }

    impl interface::FramebufferAllocator for TestAlloc {
        fn reserve(&mut self, bytes: usize) -> Result<Reservation, &'static str> {
            self.last_request = Some(bytes);
            Ok(Reservation {
                base: Address::new(FB_BASE),
                size: bytes,
            })
        }

        fn release(&mut self, _reservation: Reservation) {
            self.released = true;
        }
    }

    struct TestClock {
        rate_hz: Option<u32>,
    }

    impl interface::PixelClock for TestClock {
        fn set_rate_hz(&mut self, hz: u32) {
            self.rate_hz = Some(hz);
        }
    }

    struct TestMmu {
        regions: Vec<(MemoryRegion<Physical>, AttributeFields)>,
    }

    impl MemoryManagement for TestMmu {
        fn set_region_attributes(
            &mut self,
            region: MemoryRegion<Physical>,
            attributes: AttributeFields,
        ) -> Result<(), MmuError> {
            self.regions.push((region, attributes));
            Ok(())
        }
    }

    /// A bridge that resolves and attaches but rejects every timing.
    struct RejectingBridge;

    impl DisplaySink for RejectingBridge {
        fn attach(&mut self) -> Result<(), display::SinkError> {
            Ok(())
        }

        fn display_timing(&self) -> Result<TimingDescriptor, display::SinkError> {
            Ok(mode::DEFAULT)
        }

        fn check_timing(&self, _timing: &TimingDescriptor) -> Result<(), display::SinkError> {
            Err(display::SinkError::TimingRejected)
        }

        fn set_backlight(&mut self, _percent: u8) -> Result<(), display::SinkError> {
            Err(display::SinkError::NoBacklight)
        }
    }

    /// Delay source for waits that are expected to finish immediately.
    struct NopDelay;

    impl DelayNs for NopDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Emulates a scan-out that never reaches vertical blanking: every
    /// delay tick clears the latch the driver is polling.
    struct StalledScanout {
        status: *mut u32,
    }

    impl DelayNs for StalledScanout {
        fn delay_ns(&mut self, _ns: u32) {
            unsafe { write_volatile(self.status, 0) };
        }
    }

    fn default_layer(reservation_base: usize) -> LayerDescriptor {
        LayerDescriptor {
            base_address: Address::new(reservation_base),
            stride_bytes: 1920 * 4,
            pixel_format: PixelFormat::Argb8888,
            width: 1920,
            height: 1080,
        }
    }

    fn probed_driver<'d>(harness: &Harness) -> (Lcdif<'d>, TestAlloc, TestClock, TestMmu) {
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();
        let mut clock = TestClock { rate_hz: None };
        let mut mmu = TestMmu {
            regions: Vec::new(),
        };

        driver.bind(&mut alloc).unwrap();
        driver
            .probe(
                &default_layer(FB_BASE),
                SinkLink::NotPresent,
                &mut clock,
                &mut mmu,
            )
            .unwrap();

        (driver, alloc, clock, mmu)
    }

    #[test]
    fn default_watermarks_follow_fifo_thirds() {
        let (low, high) = compute_watermarks(&FifoThresholds::default());

        // ceil(511 / 3) and ceil(511 * 2 / 3).
        assert_eq!(low.get(), 171);
        assert_eq!(high.get(), 341);
    }

    #[test]
    fn watermark_ordering_is_monotonic() {
        for low_div in 1..=4u32 {
            for low_mul in 1..=low_div {
                for high_div in 1..=4u32 {
                    for high_mul in 1..=high_div {
                        if low_mul * high_div > high_mul * low_div {
                            continue; // low ratio above high ratio
                        }

                        let thresholds = FifoThresholds::from_config(
                            Some((low_mul, low_div)),
                            Some((high_mul, high_div)),
                        );
                        let (low, high) = compute_watermarks(&thresholds);

                        assert!(low.get() <= high.get());
                    }
                }
            }
        }
    }

    #[test]
    fn invalid_threshold_pairs_fall_back_independently() {
        // Both bad: both defaults.
        let thresholds = FifoThresholds::from_config(Some((1, 0)), Some((5, 3)));
        assert_eq!(thresholds, FifoThresholds::default());

        // Bad high ratio leaves a good low ratio alone.
        let thresholds = FifoThresholds::from_config(Some((1, 2)), Some((9, 0)));
        assert_eq!(thresholds.low, Ratio { mul: 1, div: 2 });
        assert_eq!(thresholds.high, FifoThresholds::DEFAULT_HIGH);

        // Absent pairs take defaults.
        let thresholds = FifoThresholds::from_config(None, None);
        assert_eq!(thresholds, FifoThresholds::default());
    }

    #[test]
    fn unsupported_format_fails_without_side_effect() {
        let harness = Harness::new();
        let registers = unsafe { Registers::new(harness.base()) };

        let result = Lcdif::set_pixel_format(&registers, PixelFormat::Rgb888);

        assert!(matches!(
            result,
            Err(LcdifError::UnsupportedFormat {
                format: PixelFormat::Rgb888
            })
        ));
        assert!(harness.is_all_zero());
    }

    #[test]
    fn pixel_format_codes_reach_the_descriptor() {
        let harness = Harness::new();
        let registers = unsafe { Registers::new(harness.base()) };

        Lcdif::set_pixel_format(&registers, PixelFormat::Rgb565).unwrap();
        assert_eq!((harness.read32(CTRLDESCL0_5_OFF) >> 24) & 0xf, 0x4);

        Lcdif::set_pixel_format(&registers, PixelFormat::Argb8888).unwrap();
        assert_eq!((harness.read32(CTRLDESCL0_5_OFF) >> 24) & 0xf, 0x9);
    }

    #[test]
    fn mode_programming_round_trip() {
        let harness = Harness::new();
        let registers = unsafe { Registers::new(harness.base()) };

        let timing = TimingDescriptor {
            hsync_active_low: true,
            vsync_active_low: true,
            ..mode::DEFAULT
        };

        Lcdif::program_mode(&registers, &timing);

        let disp_size = harness.read32(DISP_SIZE_OFF);
        assert_eq!(disp_size & 0xffff, timing.active_width);
        assert_eq!(disp_size >> 16, timing.active_height);

        let hsyn = harness.read32(HSYN_PARA_OFF);
        assert_eq!(hsyn >> 16, timing.h_back_porch);
        assert_eq!(hsyn & 0xffff, timing.h_front_porch);

        let vsyn = harness.read32(VSYN_PARA_OFF);
        assert_eq!(vsyn >> 16, timing.v_back_porch);
        assert_eq!(vsyn & 0xffff, timing.v_front_porch);

        let widths = harness.read32(VSYN_HSYN_WIDTH_OFF);
        assert_eq!(widths >> 16, timing.v_sync_len);
        assert_eq!(widths & 0xffff, timing.h_sync_len);

        let layer_size = harness.read32(CTRLDESCL0_1_OFF);
        assert_eq!(layer_size & 0xffff, timing.active_width);
        assert_eq!(layer_size >> 16, timing.active_height);

        // Both syncs active low: both invert bits set.
        let ctrl = harness.read32(CTRL_OFF);
        assert_eq!(ctrl & 0b11, 0b11);

        // Active-high syncs clear the invert bits again.
        Lcdif::program_mode(&registers, &mode::DEFAULT);
        assert_eq!(harness.read32(CTRL_OFF) & 0b11, 0b00);
    }

    #[test]
    fn bind_reserves_worst_case_framebuffer() {
        let harness = Harness::new();
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();

        driver.bind(&mut alloc).unwrap();

        assert_eq!(driver.state(), ControllerState::Bound);
        assert!(alloc.last_request.unwrap() >= 1920 * 1080 * 4 * 2);
        // Bind touches no hardware.
        assert!(harness.is_all_zero());
    }

    #[test]
    fn invalid_transitions_fail_fast_without_hardware_access() {
        let harness = Harness::new();
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();
        let mut delay = NopDelay;

        // Nothing is adjacent to Unbound except bind.
        assert!(matches!(
            driver.enable(),
            Err(LcdifError::InvalidTransition { .. })
        ));
        assert!(matches!(
            driver.disable(&mut delay),
            Err(LcdifError::InvalidTransition { .. })
        ));
        assert!(matches!(
            driver.remove(&mut alloc),
            Err(LcdifError::InvalidTransition { .. })
        ));

        driver.bind(&mut alloc).unwrap();

        // Enable is not adjacent to Bound either.
        assert!(matches!(
            driver.enable(),
            Err(LcdifError::InvalidTransition { .. })
        ));
        assert!(matches!(
            driver.bind(&mut alloc),
            Err(LcdifError::InvalidTransition { .. })
        ));

        assert_eq!(driver.state(), ControllerState::Bound);
        assert!(harness.is_all_zero());
    }

    #[test]
    fn missing_base_address_is_fatal() {
        let mut driver = Lcdif::new(Config::default());
        let mut alloc = TestAlloc::new();
        let mut clock = TestClock { rate_hz: None };
        let mut mmu = TestMmu {
            regions: Vec::new(),
        };

        driver.bind(&mut alloc).unwrap();
        let result = driver.probe(
            &default_layer(FB_BASE),
            SinkLink::NotPresent,
            &mut clock,
            &mut mmu,
        );

        assert!(matches!(result, Err(LcdifError::MissingBaseAddress)));
        assert_eq!(driver.state(), ControllerState::Bound);
    }

    #[test]
    fn zero_pixel_clock_is_rejected_before_any_register_write() {
        let harness = Harness::new();
        let mut panel = FixedModePanel::new(TimingDescriptor {
            pixel_clock_hz: 0,
            ..mode::DEFAULT
        });
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();
        let mut clock = TestClock { rate_hz: None };
        let mut mmu = TestMmu {
            regions: Vec::new(),
        };

        driver.bind(&mut alloc).unwrap();
        let result = driver.probe(
            &default_layer(FB_BASE),
            SinkLink::Resolved(&mut panel),
            &mut clock,
            &mut mmu,
        );

        assert!(matches!(result, Err(LcdifError::InvalidTiming { .. })));
        assert_eq!(driver.state(), ControllerState::Bound);
        assert!(clock.rate_hz.is_none());
        assert!(harness.is_all_zero());
    }

    #[test]
    fn rejected_timing_leaves_controller_bound_and_retryable() {
        let harness = Harness::new();
        let mut bridge = RejectingBridge;
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();
        let mut clock = TestClock { rate_hz: None };
        let mut mmu = TestMmu {
            regions: Vec::new(),
        };

        driver.bind(&mut alloc).unwrap();

        let result = driver.probe(
            &default_layer(FB_BASE),
            SinkLink::Resolved(&mut bridge),
            &mut clock,
            &mut mmu,
        );
        assert!(matches!(result, Err(LcdifError::TimingNegotiationFailed)));
        assert_eq!(driver.state(), ControllerState::Bound);

        // A fresh probe without the bridge succeeds.
        driver
            .probe(
                &default_layer(FB_BASE),
                SinkLink::NotPresent,
                &mut clock,
                &mut mmu,
            )
            .unwrap();
        assert_eq!(driver.state(), ControllerState::Probed);
    }

    #[test]
    fn broken_link_is_distinct_from_absent_link() {
        let harness = Harness::new();
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();
        let mut clock = TestClock { rate_hz: None };
        let mut mmu = TestMmu {
            regions: Vec::new(),
        };

        driver.bind(&mut alloc).unwrap();

        let result = driver.probe(
            &default_layer(FB_BASE),
            SinkLink::Broken,
            &mut clock,
            &mut mmu,
        );

        assert!(matches!(result, Err(LcdifError::BrokenLink)));
        assert_eq!(driver.state(), ControllerState::Bound);
        assert!(harness.is_all_zero());
    }

    #[test]
    fn unsupported_layer_format_fails_the_probe() {
        let harness = Harness::new();
        let mut driver = Lcdif::new(harness.config());
        let mut alloc = TestAlloc::new();
        let mut clock = TestClock { rate_hz: None };
        let mut mmu = TestMmu {
            regions: Vec::new(),
        };

        let layer = LayerDescriptor {
            pixel_format: PixelFormat::Rgb888,
            stride_bytes: 1920 * 3,
            ..default_layer(FB_BASE)
        };

        driver.bind(&mut alloc).unwrap();
        let result = driver.probe(&layer, SinkLink::NotPresent, &mut clock, &mut mmu);

        assert!(matches!(result, Err(LcdifError::UnsupportedFormat { .. })));
        assert_eq!(driver.state(), ControllerState::Bound);
    }

    #[test]
    fn probe_programs_the_whole_controller() {
        let harness = Harness::new();
        let (driver, _alloc, clock, mmu) = probed_driver(&harness);

        assert_eq!(driver.state(), ControllerState::Probed);
        assert_eq!(driver.timing(), Some(&mode::DEFAULT));
        assert_eq!(clock.rate_hz, Some(148_500_000));

        // Soft reset released through the CLR port.
        assert_eq!(harness.read32(CTRL_CLR_OFF), 1 << 31);

        // Watermarks: low 171 / high 341, panic prioritization on.
        assert_eq!(harness.read32(PANIC0_THRES_OFF), (341 << 16) | 171);
        assert_eq!(harness.read32(INT_ENABLE_D1_OFF), 1);

        // Timing and geometry.
        assert_eq!(harness.read32(DISP_SIZE_OFF), (1080 << 16) | 1920);
        assert_eq!(harness.read32(HSYN_PARA_OFF), (148 << 16) | 88);
        assert_eq!(harness.read32(VSYN_PARA_OFF), (36 << 16) | 4);
        assert_eq!(harness.read32(VSYN_HSYN_WIDTH_OFF), (5 << 16) | 44);
        assert_eq!(harness.read32(CTRLDESCL0_1_OFF), (1080 << 16) | 1920);

        // 24-bit bus, normal mode: both fields zero, display still off.
        assert_eq!(harness.read32(DISP_PARA_OFF), 0);

        // Layer: base address, pitch, AXI sizes, ARGB8888, DMA still off.
        assert_eq!(harness.read32(CTRLDESCL_LOW0_4_OFF), FB_BASE as u32);
        assert_eq!(
            harness.read32(CTRLDESCL0_3_OFF),
            (1 << 20) | (1 << 16) | (1920 * 4)
        );
        assert_eq!(harness.read32(CTRLDESCL0_5_OFF), 0x9 << 24);

        // Cache policy: one section-aligned region covering the
        // reservation, write-back cacheable, and the published flag.
        assert_eq!(mmu.regions.len(), 1);
        let (region, attributes) = &mmu.regions[0];
        let section = ImxHost::mmu_section_size();
        assert!(region.start_addr().is_aligned(section));
        assert!(region.end_addr_exclusive().is_aligned(section));
        assert!(region.start_addr().as_usize() <= FB_BASE);
        assert!(region.end_addr_exclusive().as_usize() >= FB_BASE + MAX_FRAMEBUFFER_BYTES);
        assert_eq!(attributes.mem_attributes, MemAttributes::CacheableDRAM);
        assert_eq!(attributes.acc_perms, AccessPermissions::ReadWrite);
        assert!(framebuffer_needs_flush());
    }

    #[test]
    fn enable_arms_shadow_load_dma_and_display() {
        let harness = Harness::new();
        let (mut driver, _alloc, _clock, _mmu) = probed_driver(&harness);

        driver.enable().unwrap();

        assert_eq!(driver.state(), ControllerState::Enabled);

        let descl0_5 = harness.read32(CTRLDESCL0_5_OFF);
        assert_ne!(descl0_5 & (1 << 31), 0, "layer DMA enable");
        assert_ne!(descl0_5 & (1 << 30), 0, "shadow load enable");
        assert_ne!(
            harness.read32(DISP_PARA_OFF) & (1 << 31),
            0,
            "display output enable"
        );
    }

    #[test]
    fn enable_requests_the_backlight() {
        let harness = Harness::new();
        let mut panel = FixedModePanel::new(mode::DEFAULT);

        {
            let mut driver = Lcdif::new(harness.config());
            let mut alloc = TestAlloc::new();
            let mut clock = TestClock { rate_hz: None };
            let mut mmu = TestMmu {
                regions: Vec::new(),
            };

            driver.bind(&mut alloc).unwrap();
            driver
                .probe(
                    &default_layer(FB_BASE),
                    SinkLink::Resolved(&mut panel),
                    &mut clock,
                    &mut mmu,
                )
                .unwrap();
            driver.enable().unwrap();
        }

        assert_eq!(panel.backlight_percent(), Some(DEFAULT_BACKLIGHT_PERCENT));
    }

    #[test]
    fn disable_synchronizes_to_vblank_when_it_arrives() {
        let harness = Harness::new();
        let (mut driver, _alloc, _clock, _mmu) = probed_driver(&harness);
        let mut delay = NopDelay;

        driver.enable().unwrap();

        // In the RAM emulation the arming write leaves the latch set, which
        // models a vblank arriving immediately.
        let outcome = driver.disable(&mut delay).unwrap();

        assert_eq!(outcome, VblankWait::Synced);
        assert_eq!(driver.state(), ControllerState::Disabled);

        // DMA and display output both off again.
        assert_eq!(harness.read32(CTRLDESCL0_5_OFF) & (1 << 31), 0);
        assert_eq!(harness.read32(DISP_PARA_OFF) & (1 << 31), 0);
    }

    #[test]
    fn disable_completes_even_when_vblank_never_fires() {
        let harness = Harness::new();
        let (mut driver, _alloc, _clock, _mmu) = probed_driver(&harness);
        let mut delay = StalledScanout {
            status: harness.status_d0_ptr(),
        };

        driver.enable().unwrap();
        let outcome = driver.disable(&mut delay).unwrap();

        assert_eq!(outcome, VblankWait::TimedOut);
        assert_eq!(driver.state(), ControllerState::Disabled);
        assert_eq!(harness.read32(CTRLDESCL0_5_OFF) & (1 << 31), 0);
        assert_eq!(harness.read32(DISP_PARA_OFF) & (1 << 31), 0);
    }

    #[test]
    fn remove_releases_the_reservation_and_is_terminal() {
        let harness = Harness::new();
        let (mut driver, mut alloc, _clock, _mmu) = probed_driver(&harness);
        let mut delay = NopDelay;

        driver.enable().unwrap();
        driver.disable(&mut delay).unwrap();
        driver.remove(&mut alloc).unwrap();

        assert_eq!(driver.state(), ControllerState::Removed);
        assert!(alloc.released);

        // Terminal: nothing works anymore.
        assert!(matches!(
            driver.bind(&mut alloc),
            Err(LcdifError::InvalidTransition { .. })
        ));
        assert!(matches!(
            driver.enable(),
            Err(LcdifError::InvalidTransition { .. })
        ));
    }
}
