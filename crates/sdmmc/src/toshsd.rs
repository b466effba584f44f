//! Register-level controller for the TMIO-style SD/MMC host ("TOSHSD").
//!
//! Both ports share one set of registers; the clock and option registers are
//! saved per port and restored whenever a port is selected.
//!
//! # References
//! - [EMMC Registers](https://www.3dbrew.org/wiki/EMMC_Registers)
//! - [SD/MMC/SDIO Registers](https://dsibrew.org/wiki/SD/MMC/SDIO_Registers)

use crate::error::HostError;
use crate::host::{
    Buffer, BusWidth, Command, Controller, Delay, Direction, Response, ResponseKind, Transfer,
};
use sdmmc_hw::specs::{clock, timing};
use sdmmc_hw::toshsd::{
    NUM_PORTS, clkctl, cmd, data_ctl, data32_ctl, opt, registers as reg, reset, status0, status1,
    stop,
};
use tracing::{debug, trace};

/// Status polls between two 1 ms waits
const POLLS_PER_MS: u32 = 64;

/// Wall-clock budget, spent in 1 ms waits between bursts of status polls
struct Budget {
    left_ms: u32,
    polls: u32,
}

impl Budget {
    fn new(ms: u32) -> Self {
        Self { left_ms: ms, polls: 0 }
    }

    /// Count one poll; false once the budget is used up
    fn tick<D: Delay>(&mut self, delay: &mut D) -> bool {
        self.polls += 1;
        if self.polls < POLLS_PER_MS {
            return true;
        }
        self.polls = 0;
        if self.left_ms == 0 {
            return false;
        }
        delay.delay_ms(1);
        self.left_ms -= 1;
        true
    }
}

/// Register access by offset from the controller base
pub trait RegisterBus {
    /// Read a 16-bit (`size == 2`) or 32-bit (`size == 4`) register
    fn read(&mut self, offset: u32, size: usize) -> u32;

    /// Write a 16-bit (`size == 2`) or 32-bit (`size == 4`) register
    fn write(&mut self, offset: u32, size: usize, value: u32);
}

/// Memory-mapped registers of a physical controller
#[derive(Debug)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a TOSHSD register block that stays mapped
    /// for the lifetime of this value, and nothing else may access it meanwhile.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }
}

impl RegisterBus for Mmio {
    fn read(&mut self, offset: u32, size: usize) -> u32 {
        let addr = self.base + offset as usize;
        // SAFETY: `Mmio::new` guarantees the register block is mapped and exclusively ours.
        unsafe {
            match size {
                2 => core::ptr::read_volatile(addr as *const u16) as u32,
                _ => core::ptr::read_volatile(addr as *const u32),
            }
        }
    }

    fn write(&mut self, offset: u32, size: usize, value: u32) {
        let addr = self.base + offset as usize;
        // SAFETY: see `read`
        unsafe {
            match size {
                2 => core::ptr::write_volatile(addr as *mut u16, value as u16),
                _ => core::ptr::write_volatile(addr as *mut u32, value),
            }
        }
    }
}

/// Clock and bus settings of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortSettings {
    clkctl: u16,
    opt: u16,
}

impl PortSettings {
    /// Identification mode: 400 kHz or below, 1-bit bus
    fn ident() -> Self {
        let (div, _) = clock_divider(clock::INIT_HZ);
        Self {
            clkctl: clkctl::CLK_EN | div,
            opt: opt::TIMEOUTS_DEFAULT | opt::BUS_WIDTH_1BIT,
        }
    }
}

/// Pick the divider bits for the fastest card clock not above `hz`.
///
/// Returns the CLKCTL divider field and the resulting frequency.
pub fn clock_divider(hz: u32) -> (u16, u32) {
    // divisor = 2 << shift, HCLK/2 .. HCLK/512
    let mut shift = 0u32;
    while shift < 8 && clock::HCLK_HZ / (2 << shift) > hz {
        shift += 1;
    }
    let bits = if shift == 0 { 0 } else { 1u16 << (shift - 1) };
    (bits, clock::HCLK_HZ / (2 << shift))
}

/// TOSHSD host controller driving a [`RegisterBus`]
pub struct Toshsd<B, D> {
    bus: B,
    delay: D,
    port: u8,
    ports: [PortSettings; NUM_PORTS],
}

impl<B: RegisterBus, D: Delay> Toshsd<B, D> {
    pub fn new(bus: B, delay: D) -> Self {
        let mut host = Self {
            bus,
            delay,
            port: 0,
            ports: [PortSettings::ident(); NUM_PORTS],
        };
        host.soft_reset();
        host.apply_port();
        host
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Currently selected port
    pub fn port(&self) -> u8 {
        self.port
    }

    fn read16(&mut self, offset: u32) -> u16 {
        self.bus.read(offset, 2) as u16
    }

    fn write16(&mut self, offset: u32, value: u16) {
        self.bus.write(offset, 2, value as u32);
    }

    fn soft_reset(&mut self) {
        self.write16(reg::RESET, 0);
        self.write16(reg::RESET, reset::RELEASE);
        self.write16(reg::STOP, 0);
        self.write16(reg::STATUS0, 0);
        self.write16(reg::STATUS1, 0);
        self.write16(reg::DATA_CTL, data_ctl::DATA32_MODE);
        self.write16(reg::DATA32_CTL, data32_ctl::MODE32 | data32_ctl::FIFO_CLEAR);
    }

    fn apply_port(&mut self) {
        let settings = self.ports[self.port as usize];
        self.write16(reg::PORTSEL, self.port as u16);
        // The divider may only change while the card clock is stopped
        self.write16(reg::CLKCTL, settings.clkctl & !clkctl::CLK_EN);
        self.write16(reg::CLKCTL, settings.clkctl);
        self.write16(reg::OPT, settings.opt);
    }

    fn wait_idle(&mut self) -> Result<(), HostError> {
        let mut budget = Budget::new(timing::CMD_RESPONSE_MS);
        loop {
            if self.read16(reg::STATUS1) & status1::CMD_BUSY == 0 {
                return Ok(());
            }
            if !budget.tick(&mut self.delay) {
                return Err(HostError::Busy);
            }
        }
    }

    /// Program block geometry and the FIFO before the command goes out
    fn arm_data(&mut self, xfer: &Transfer<'_>) {
        self.write16(reg::BLKCOUNT, xfer.blocks);
        self.write16(reg::BLKLEN, xfer.block_size);
        self.write16(reg::DATA32_BLK_COUNT, xfer.blocks);
        self.write16(reg::DATA32_BLK_LEN, xfer.block_size);
        self.write16(reg::DATA_CTL, data_ctl::DATA32_MODE);

        let mut ctl = data32_ctl::MODE32 | data32_ctl::FIFO_CLEAR;
        if let Buffer::Dma(dir) = xfer.buffer {
            ctl |= match dir {
                Direction::Read => data32_ctl::RX32_READY_IRQ,
                Direction::Write => data32_ctl::TX32_REQ_IRQ,
            };
        }
        self.write16(reg::DATA32_CTL, ctl);
    }

    fn read_response(&mut self) -> Response {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let lo = self.read16(reg::RESP0 + (i as u32) * 4) as u32;
            let hi = self.read16(reg::RESP0 + (i as u32) * 4 + 2) as u32;
            *word = hi << 16 | lo;
        }
        Response { words }
    }

    /// Poll until the command (and its data phase) completes.
    ///
    /// The response gets `CMD_RESPONSE_MS`; after it, every data block and the
    /// final busy phase get `DATA_BLOCK_MS` each.
    fn wait_done(&mut self, mut data: Option<Transfer<'_>>) -> Result<(), HostError> {
        let total = data.as_ref().map_or(0, |x| x.words());
        let block_words = data.as_ref().map_or(0, |x| x.block_size as usize / 4);
        let mut done = 0usize;
        let mut resp_end = false;
        let mut budget = Budget::new(timing::CMD_RESPONSE_MS);

        loop {
            let st0 = self.read16(reg::STATUS0);
            let st1 = self.read16(reg::STATUS1);
            if st1 & status1::ERR_MASK != 0 {
                return Err(map_error(st1));
            }
            if !resp_end && st0 & status0::CMD_RESP_END != 0 {
                resp_end = true;
                budget = Budget::new(timing::DATA_BLOCK_MS);
            }

            let Some(xfer) = data.as_mut() else {
                if resp_end {
                    return Ok(());
                }
                if !budget.tick(&mut self.delay) {
                    return Err(HostError::CmdTimeout);
                }
                continue;
            };

            if done < total {
                let ctl = self.read16(reg::DATA32_CTL);
                match &mut xfer.buffer {
                    Buffer::Read(buf) if ctl & data32_ctl::RX32_READY != 0 => {
                        let block = buf
                            .get_mut(done..done + block_words)
                            .ok_or(HostError::Overrun)?;
                        for word in block {
                            *word = self.bus.read(reg::DATA32_FIFO, 4);
                        }
                        done += block_words;
                        budget = Budget::new(timing::DATA_BLOCK_MS);
                        continue;
                    }
                    Buffer::Write(buf) if resp_end && ctl & data32_ctl::TX32_FULL == 0 => {
                        let block = buf
                            .get(done..done + block_words)
                            .ok_or(HostError::Overrun)?;
                        for &word in block {
                            self.bus.write(reg::DATA32_FIFO, 4, word);
                        }
                        done += block_words;
                        budget = Budget::new(timing::DATA_BLOCK_MS);
                        continue;
                    }
                    _ => {}
                }
            }

            if resp_end && st0 & status0::DATA_END != 0 {
                return Ok(());
            }
            if !budget.tick(&mut self.delay) {
                return Err(if resp_end {
                    HostError::DataTimeout
                } else {
                    HostError::CmdTimeout
                });
            }
        }
    }
}

fn map_error(st1: u16) -> HostError {
    if st1 & status1::ERR_CMD_TIMEOUT != 0 {
        HostError::CmdTimeout
    } else if st1 & status1::ERR_CRC != 0 {
        HostError::Crc
    } else if st1 & status1::ERR_DATA_TIMEOUT != 0 {
        HostError::DataTimeout
    } else if st1 & (status1::ERR_RX_OVERFLOW | status1::ERR_TX_UNDERRUN) != 0 {
        HostError::Overrun
    } else {
        HostError::Other((st1 & status1::ERR_MASK) as u32)
    }
}

fn command_bits(command: &Command, data: Option<&Transfer<'_>>) -> u16 {
    let mut bits = command.index as u16 & cmd::INDEX_MASK;
    if command.app {
        bits |= cmd::APP;
    }
    bits |= match command.response {
        ResponseKind::None => cmd::RESP_NONE,
        ResponseKind::R1 | ResponseKind::R6 | ResponseKind::R7 => cmd::RESP_R1,
        ResponseKind::R1b => cmd::RESP_R1B,
        ResponseKind::R2 => cmd::RESP_R2,
        ResponseKind::R3 => cmd::RESP_R3,
    };
    if let Some(xfer) = data {
        bits |= cmd::DATA_EN;
        if xfer.buffer.direction() == Direction::Read {
            bits |= cmd::DATA_READ;
        }
        if xfer.blocks > 1 {
            bits |= cmd::MULTI_BLOCK;
        }
    }
    bits
}

impl<B: RegisterBus, D: Delay> Controller for Toshsd<B, D> {
    fn select_port(&mut self, port: u8) {
        let port = port.min(NUM_PORTS as u8 - 1);
        if port != self.port {
            trace!("TOSHSD port {} -> {}", self.port, port);
        }
        self.port = port;
        self.apply_port();
    }

    fn reset(&mut self) {
        debug!("TOSHSD reset (port {})", self.port);
        self.soft_reset();
        self.ports[self.port as usize] = PortSettings::ident();
        self.apply_port();
    }

    fn issue(&mut self, command: &Command, data: Option<Transfer<'_>>) -> Result<Response, HostError> {
        self.wait_idle()?;

        let bits = command_bits(command, data.as_ref());
        trace!(
            "TOSHSD CMD{}{} arg={:#X} bits={:#06X}",
            if command.app { "(A)" } else { "" },
            command.index,
            command.arg,
            bits
        );

        self.write16(reg::STATUS0, 0);
        self.write16(reg::STATUS1, 0);
        if let Some(xfer) = &data {
            self.arm_data(xfer);
        }
        self.write16(reg::CMDARG0, command.arg as u16);
        self.write16(reg::CMDARG1, (command.arg >> 16) as u16);
        self.write16(reg::CMD, bits);

        let has_data = data.is_some();
        if let Err(e) = self.wait_done(data) {
            trace!("TOSHSD CMD{} failed: {}", command.index, e);
            if has_data {
                self.write16(reg::STOP, stop::STOP);
            }
            return Err(e);
        }
        Ok(self.read_response())
    }

    fn set_clock(&mut self, hz: u32) -> u32 {
        let (div, actual) = clock_divider(hz);
        debug!(
            "TOSHSD port {} clock: requested {} Hz, programmed {} Hz",
            self.port, hz, actual
        );
        self.ports[self.port as usize].clkctl = clkctl::CLK_EN | div;
        self.apply_port();
        actual
    }

    fn set_bus_width(&mut self, width: BusWidth) {
        debug!("TOSHSD port {} bus width: {}", self.port, width as u8);
        let settings = &mut self.ports[self.port as usize];
        match width {
            BusWidth::One => settings.opt |= opt::BUS_WIDTH_1BIT,
            BusWidth::Four => settings.opt &= !opt::BUS_WIDTH_1BIT,
        }
        self.apply_port();
    }

    fn card_present(&mut self) -> bool {
        self.read16(reg::STATUS0) & status0::CARD_PRESENT != 0
    }

    fn write_protect_slider(&mut self) -> bool {
        self.read16(reg::STATUS0) & status0::WRITE_ENABLED == 0
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
