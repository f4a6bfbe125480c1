//! Register-level driver for the USB OTG full-speed core, presented to the device stack as a banked endpoint
//! controller.
//!
//! The OTG core has a shared receive FIFO and one transmit FIFO per IN endpoint, and it handles the status
//! stage of control transfers in software. This module drains the receive FIFO into per-endpoint staging
//! buffers as packets arrive and tracks the control transfer phase, so the stack sees one packet at a time per
//! endpoint, a data-end handshake and the setup-end/sent-stall conditions it expects.

use embassy_stm32::{
    Peri,
    interrupt::{self, typelevel::Interrupt as _},
    pac::{
        self,
        gpio::vals as gpio_vals,
        otg::{Otg, vals},
    },
    peripherals::{PA11, PA12, USB_OTG_FS},
};
use midi2usb_lib::usb::{BULK_MAX_PACKET_SIZE, Ep0Status, EndpointController, Interrupts};

#[cfg(feature = "defmt")]
use defmt::*;

use crate::BRIDGE;

const REGS: Otg = pac::USB_OTG_FS;

const EP0_MAX_PACKET_SIZE: usize = 64;
const BULK_IN: usize = 1;
const BULK_OUT: usize = 2;

/// FIFO layout, in 32-bit words.
const RX_FIFO_WORDS: u16 = 128;
const TX_FIFO_WORDS: u16 = 16;

/// Stage of the control transfer on endpoint 0.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    /// Setup packet waiting for the stack.
    Setup { data_in: bool, length: u16 },
    DataIn,
    DataOut,
    /// Sending the zero-length status packet of a no-data or OUT request.
    StatusIn,
    /// Waiting for the host's zero-length status packet after an IN data stage.
    StatusOut,
}

/// A received packet waiting to be read.
struct Staged {
    data: [u8; EP0_MAX_PACKET_SIZE],
    len: usize,
    ready: bool,
    position: usize,
}

impl Staged {
    const fn new() -> Self {
        Self {
            data: [0; EP0_MAX_PACKET_SIZE],
            len: 0,
            ready: false,
            position: 0,
        }
    }

    fn clear(&mut self) {
        self.ready = false;
        self.len = 0;
        self.position = 0;
    }
}

/// The USB OTG-FS peripheral in device mode.
pub struct OtgFs {
    index: u8,
    phase: Phase,
    ep0_out: Staged,
    bulk_out: Staged,
    tx: [u8; BULK_MAX_PACKET_SIZE],
    tx_len: usize,
    ep0_in_busy: bool,
    bulk_in_busy: bool,
    sent_stall: bool,
    setup_end: bool,
    /// Sources raised while draining FIFOs, reported with the next [`EndpointController::interrupts`] call.
    raised: Interrupts,
}

impl OtgFs {
    /// A controller for a core which has not been initialized yet. See [`init`].
    pub const fn new() -> Self {
        Self {
            index: 0,
            phase: Phase::Idle,
            ep0_out: Staged::new(),
            bulk_out: Staged::new(),
            tx: [0; BULK_MAX_PACKET_SIZE],
            tx_len: 0,
            ep0_in_busy: false,
            bulk_in_busy: false,
            sent_stall: false,
            setup_end: false,
            raised: Interrupts::none(),
        }
    }

    fn staged(&mut self) -> Option<&mut Staged> {
        match usize::from(self.index) {
            0 => Some(&mut self.ep0_out),
            BULK_OUT => Some(&mut self.bulk_out),
            _ => None,
        }
    }

    fn on_bus_reset(&mut self) {
        REGS.grstctl().write(|w| {
            w.set_txfflsh(true);
            w.set_txfnum(0x10);
        });
        while REGS.grstctl().read().txfflsh() {}
        REGS.grstctl().write(|w| w.set_rxfflsh(true));
        while REGS.grstctl().read().rxfflsh() {}

        REGS.dcfg().modify(|w| w.set_dad(0));
        REGS.daintmsk().write(|w| {
            w.set_iepm(1 << 0);
            w.set_oepm(1 << 0);
        });
        REGS.diepmsk().write(|w| w.set_xfrcm(true));
        REGS.doepmsk().write(|w| {
            w.set_stupm(true);
            w.set_xfrcm(true);
        });

        // endpoint 0 uses transmit FIFO 0 and 64-byte packets (encoded as 0)
        REGS.diepctl(0).write(|w| {
            w.set_mpsiz(0);
            w.set_txfnum(0);
        });
        self.phase = Phase::Idle;
        self.ep0_out.clear();
        self.bulk_out.clear();
        self.tx_len = 0;
        self.ep0_in_busy = false;
        self.bulk_in_busy = false;
        self.sent_stall = false;
        self.setup_end = false;
        arm_ep0_out();
    }

    /// The host abandoned the control transfer: the IN packet it never collected must not answer the next one.
    fn abort_control_transfer(&mut self) {
        REGS.diepctl(0).modify(|w| w.set_snak(true));
        REGS.grstctl().write(|w| {
            w.set_txfflsh(true);
            w.set_txfnum(0);
        });
        while REGS.grstctl().read().txfflsh() {}

        self.ep0_in_busy = false;
        self.tx_len = 0;
        self.setup_end = true;
    }

    /// Moves every packet in the receive FIFO into its staging buffer.
    fn drain_rx_fifo(&mut self) {
        while REGS.gintsts().read().rxflvl() {
            let status = REGS.grxstsp().read();
            let endpoint = status.epnum() as usize;
            let count = status.bcnt() as usize;

            match status.pktstsd() {
                vals::Pktstsd::SETUP_DATA_RX => {
                    if matches!(self.phase, Phase::DataIn | Phase::DataOut) {
                        self.abort_control_transfer();
                    }
                    self.ep0_out.clear();
                    read_fifo_into(&mut self.ep0_out.data[..count.min(8)], count);
                    self.ep0_out.len = 8;
                    let setup = &self.ep0_out.data;
                    self.phase = Phase::Setup {
                        data_in: setup[0] & 0x80 != 0,
                        length: u16::from_le_bytes([setup[6], setup[7]]),
                    };
                }
                vals::Pktstsd::SETUP_DATA_DONE => {
                    self.ep0_out.ready = true;
                    self.raised |= Interrupts::Ep0;
                }
                vals::Pktstsd::OUT_DATA_RX if endpoint == 0 => {
                    if self.phase == Phase::StatusOut && count == 0 {
                        self.phase = Phase::Idle;
                        arm_ep0_out();
                        continue;
                    }
                    let len = count.min(EP0_MAX_PACKET_SIZE);
                    read_fifo_into(&mut self.ep0_out.data[..len], count);
                    self.ep0_out.len = len;
                    self.ep0_out.position = 0;
                    self.ep0_out.ready = true;
                    self.raised |= Interrupts::Ep0;
                }
                vals::Pktstsd::OUT_DATA_RX if endpoint == BULK_OUT => {
                    let len = count.min(BULK_MAX_PACKET_SIZE);
                    read_fifo_into(&mut self.bulk_out.data[..len], count);
                    self.bulk_out.len = len;
                    self.bulk_out.position = 0;
                    self.bulk_out.ready = true;
                    self.raised |= Interrupts::BulkOut;
                }
                _ => {
                    // completion entries carry no data; anything else is discarded
                    read_fifo_into(&mut [], count);
                }
            }
        }
    }

    fn on_in_endpoints(&mut self) {
        let daint = REGS.daint().read().iepint();
        for endpoint in [0, BULK_IN] {
            if daint & (1 << endpoint) == 0 {
                continue;
            }
            let flags = REGS.diepint(endpoint).read();
            REGS.diepint(endpoint).write_value(flags);
            if !flags.xfrc() {
                continue;
            }
            if endpoint == 0 {
                self.ep0_in_busy = false;
                if self.phase == Phase::StatusIn {
                    self.phase = Phase::Idle;
                }
                self.raised |= Interrupts::Ep0;
            } else {
                self.bulk_in_busy = false;
                self.raised |= Interrupts::BulkIn;
            }
        }
    }

    fn on_out_endpoints(&mut self) {
        let daint = REGS.daint().read().oepint();
        for endpoint in [0, BULK_OUT] {
            if daint & (1 << endpoint) != 0 {
                let flags = REGS.doepint(endpoint).read();
                REGS.doepint(endpoint).write_value(flags);
            }
        }
    }

    /// Pushes the staged transmit data into the FIFO of `endpoint` as one packet.
    fn send(&mut self, endpoint: usize) {
        let len = self.tx_len;
        REGS.dieptsiz(endpoint).write(|w| {
            w.set_pktcnt(1);
            w.set_xfrsiz(len as _);
        });
        REGS.diepctl(endpoint).modify(|w| {
            w.set_cnak(true);
            w.set_epena(true);
        });
        for chunk in self.tx[..len].chunks(4) {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            REGS.fifo(endpoint).write(|w| w.set_data(u32::from_le_bytes(word)));
        }
        self.tx_len = 0;
    }
}

impl Default for OtgFs {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointController for OtgFs {
    fn interrupts(&mut self) -> Interrupts {
        let status = REGS.gintsts().read();
        let mut pending = core::mem::replace(&mut self.raised, Interrupts::none());

        if status.usbrst() {
            self.on_bus_reset();
            pending |= Interrupts::Reset;
        }
        if status.usbsusp() {
            pending |= Interrupts::Suspend;
        }
        if status.wkupint() {
            pending |= Interrupts::Resume;
        }
        if status.sof() {
            pending |= Interrupts::StartOfFrame;
        }
        REGS.gintsts().write(|w| {
            w.set_usbrst(status.usbrst());
            w.set_enumdne(status.enumdne());
            w.set_usbsusp(status.usbsusp());
            w.set_wkupint(status.wkupint());
            w.set_sof(status.sof());
        });

        if status.rxflvl() {
            self.drain_rx_fifo();
        }
        if status.iepint() {
            self.on_in_endpoints();
        }
        if status.oepint() {
            self.on_out_endpoints();
        }

        pending | core::mem::replace(&mut self.raised, Interrupts::none())
    }

    fn index(&self) -> u8 {
        self.index
    }

    fn select(&mut self, index: u8) {
        self.index = index;
    }

    fn ep0_status(&mut self) -> Ep0Status {
        let mut status = Ep0Status::none();
        if self.ep0_out.ready {
            status |= Ep0Status::OutPacketReady;
        }
        if self.ep0_in_busy {
            status |= Ep0Status::InPacketBusy;
        }
        if self.sent_stall {
            status |= Ep0Status::SentStall;
        }
        if self.setup_end {
            status |= Ep0Status::SetupEnd;
        }
        status
    }

    fn clear_sent_stall(&mut self) {
        self.sent_stall = false;
    }

    fn serviced_setup_end(&mut self) {
        self.setup_end = false;
    }

    fn out_count(&mut self) -> usize {
        self.staged().filter(|staged| staged.ready).map_or(0, |staged| staged.len)
    }

    fn read_fifo(&mut self, buf: &mut [u8]) {
        if let Some(staged) = self.staged() {
            let start = staged.position;
            let end = (start + buf.len()).min(staged.len);
            buf[..end - start].copy_from_slice(&staged.data[start..end]);
            staged.position = end;
        }
    }

    fn write_fifo(&mut self, data: &[u8]) {
        let end = (self.tx_len + data.len()).min(self.tx.len());
        self.tx[self.tx_len..end].copy_from_slice(&data[..end - self.tx_len]);
        self.tx_len = end;
    }

    fn ep0_serviced_out(&mut self, data_end: bool) {
        let phase = self.phase;
        self.ep0_out.clear();

        self.phase = match phase {
            Phase::Setup { length: 0, .. } | Phase::DataOut if data_end => {
                self.tx_len = 0;
                self.send(0);
                Phase::StatusIn
            }
            Phase::Setup { data_in: true, .. } => Phase::DataIn,
            Phase::Setup { data_in: false, .. } => Phase::DataOut,
            other => other,
        };
        arm_ep0_out();
    }

    fn ep0_in_ready(&mut self, data_end: bool) {
        self.ep0_in_busy = true;
        self.send(0);
        if data_end {
            self.phase = Phase::StatusOut;
            arm_ep0_out();
        }
    }

    fn ep0_stall(&mut self) {
        REGS.diepctl(0).modify(|w| w.set_stall(true));
        REGS.doepctl(0).modify(|w| w.set_stall(true));
        self.ep0_out.clear();
        self.phase = Phase::Idle;
        self.sent_stall = true;
    }

    fn set_address(&mut self, address: u8) {
        REGS.dcfg().modify(|w| w.set_dad(address));
    }

    fn enable_endpoints(&mut self, enable: bool) {
        REGS.diepctl(BULK_IN).write(|w| {
            w.set_usbaep(enable);
            w.set_eptyp(vals::Eptyp::BULK);
            w.set_mpsiz(BULK_MAX_PACKET_SIZE as _);
            w.set_txfnum(BULK_IN as _);
            w.set_sd0pid_sevnfrm(true);
            w.set_snak(true);
        });
        REGS.doepctl(BULK_OUT).write(|w| {
            w.set_usbaep(enable);
            w.set_eptyp(vals::Eptyp::BULK);
            w.set_mpsiz(BULK_MAX_PACKET_SIZE as _);
            w.set_sd0pid_sevnfrm(true);
        });
        REGS.daintmsk().modify(|w| {
            let mask = if enable { 1 << BULK_IN } else { 0 };
            w.set_iepm(1 | mask);
            let mask = if enable { 1 << BULK_OUT } else { 0 };
            w.set_oepm(1 | mask);
        });
        self.bulk_out.clear();
        self.bulk_in_busy = false;
        if enable {
            arm_bulk_out();
        }
    }

    fn set_halt(&mut self, halt: bool) {
        match usize::from(self.index) {
            BULK_IN => REGS.diepctl(BULK_IN).modify(|w| {
                w.set_stall(halt);
                if !halt {
                    w.set_sd0pid_sevnfrm(true);
                }
            }),
            BULK_OUT => REGS.doepctl(BULK_OUT).modify(|w| {
                w.set_stall(halt);
                if !halt {
                    w.set_sd0pid_sevnfrm(true);
                }
            }),
            _ => {}
        }
    }

    fn in_ready(&mut self) {
        self.bulk_in_busy = true;
        self.send(BULK_IN);
    }

    fn in_busy(&mut self) -> bool {
        self.bulk_in_busy
    }

    fn release_out(&mut self) {
        self.bulk_out.clear();
        arm_bulk_out();
    }
}

/// Lets endpoint 0 take the next packet. Setup packets are always accepted.
fn arm_ep0_out() {
    REGS.doeptsiz(0).write(|w| {
        w.set_rxdpid_stupcnt(3);
        w.set_pktcnt(1);
        w.set_xfrsiz(EP0_MAX_PACKET_SIZE as _);
    });
    REGS.doepctl(0).modify(|w| {
        w.set_cnak(true);
        w.set_epena(true);
    });
}

/// Lets the bulk OUT endpoint take the next packet; until then the host is NAKed.
fn arm_bulk_out() {
    REGS.doeptsiz(BULK_OUT).write(|w| {
        w.set_pktcnt(1);
        w.set_xfrsiz(BULK_MAX_PACKET_SIZE as _);
    });
    REGS.doepctl(BULK_OUT).modify(|w| {
        w.set_cnak(true);
        w.set_epena(true);
    });
}

/// Pops `count` bytes from the receive FIFO, keeping as many as fit in `into`.
fn read_fifo_into(into: &mut [u8], count: usize) {
    let mut kept = 0;
    for _ in 0..count.div_ceil(4) {
        let word = REGS.fifo(0).read().data().to_le_bytes();
        let take = (into.len() - kept).min(4);
        into[kept..kept + take].copy_from_slice(&word[..take]);
        kept += take;
    }
}

/// Routes the OTG-FS interrupt to the bridge.
pub struct InterruptHandler;

impl interrupt::typelevel::Handler<interrupt::typelevel::OTG_FS> for InterruptHandler {
    unsafe fn on_interrupt() {
        BRIDGE.on_usb_interrupt();
    }
}

/// Powers up the OTG-FS core in device mode and connects to the bus.
///
/// The board has no VBUS sensing on the USB connector, so the B-session is forced valid.
pub fn init(_otg: Peri<'static, USB_OTG_FS>, dm: Peri<'static, PA11>, dp: Peri<'static, PA12>) {
    // taking the pins keeps them from being handed out elsewhere
    let _ = (dm, dp);
    pac::GPIOA.moder().modify(|w| {
        w.set_moder(11, gpio_vals::Moder::ALTERNATE);
        w.set_moder(12, gpio_vals::Moder::ALTERNATE);
    });
    pac::GPIOA.ospeedr().modify(|w| {
        w.set_ospeedr(11, gpio_vals::Ospeedr::VERY_HIGH_SPEED);
        w.set_ospeedr(12, gpio_vals::Ospeedr::VERY_HIGH_SPEED);
    });
    pac::GPIOA.afr(1).modify(|w| {
        w.set_afr(11 - 8, 10);
        w.set_afr(12 - 8, 10);
    });

    embassy_stm32::rcc::enable_and_reset::<USB_OTG_FS>();

    REGS.gusbcfg().write(|w| w.set_physel(true));
    while !REGS.grstctl().read().ahbidl() {}
    REGS.grstctl().write(|w| w.set_csrst(true));
    while REGS.grstctl().read().csrst() {}

    REGS.gusbcfg().write(|w| {
        w.set_physel(true);
        w.set_fdmod(true);
        // turnaround time for an AHB clock above 32 MHz
        w.set_trdt(0x6);
    });
    REGS.gccfg_v2().modify(|w| {
        w.set_pwrdwn(true);
        w.set_vbden(false);
    });
    REGS.gotgctl().modify(|w| {
        w.set_bvaloen(true);
        w.set_bvaloval(true);
    });
    REGS.pcgcctl().write(|_| {});

    REGS.dctl().write(|w| w.set_sdis(true));
    REGS.dcfg().write(|w| {
        w.set_pfivl(vals::Pfivl::FRAME_INTERVAL_80);
        w.set_dspd(vals::Dspd::FULL_SPEED_INTERNAL);
    });

    REGS.grxfsiz().write(|w| w.set_rxfd(RX_FIFO_WORDS));
    REGS.dieptxf0().write(|w| {
        w.set_sa(RX_FIFO_WORDS);
        w.set_fd(TX_FIFO_WORDS);
    });
    REGS.dieptxf(BULK_IN - 1).write(|w| {
        w.set_sa(RX_FIFO_WORDS + TX_FIFO_WORDS);
        w.set_fd(TX_FIFO_WORDS);
    });

    REGS.gintsts().write_value(pac::otg::regs::Gintsts(u32::MAX));
    REGS.gintmsk().write(|w| {
        w.set_usbrst(true);
        w.set_enumdnem(true);
        w.set_usbsuspm(true);
        w.set_wuim(true);
        w.set_sofm(true);
        w.set_rxflvlm(true);
        w.set_iepint(true);
        w.set_oepint(true);
    });
    REGS.gahbcfg().write(|w| w.set_gint(true));

    interrupt::typelevel::OTG_FS::unpend();
    unsafe { interrupt::typelevel::OTG_FS::enable() };

    REGS.dctl().write(|w| w.set_sdis(false));

    #[cfg(feature = "defmt")]
    info!("USB OTG-FS core up");
}
