//! Simulated TOSHSD controller with attachable cards.
//!
//! [`SdmmcState`] models the controller's register file closely enough that
//! the real [`Toshsd`] controller code runs against it unchanged. Cards hang
//! off the two ports; a DMA window stands in for the system DMA engine that
//! services the 32-bit FIFO when the driver passes no buffer.
//!
//! # References
//! - [EMMC Registers](https://www.3dbrew.org/wiki/EMMC_Registers)
//! - [SD/MMC/SDIO Registers](https://dsibrew.org/wiki/SD/MMC/SDIO_Registers)

mod card;

pub use card::{DataFault, Preset, Reply, SimCard};

use crate::config::DriverConfig;
use crate::driver::Sdmmc;
use crate::host::Delay;
use crate::toshsd::{RegisterBus, Toshsd};
use sdmmc_hw::toshsd::{
    NUM_PORTS, cmd, data_ctl, data32_ctl, opt, registers as reg, reset, status0, status1, stop,
};
use tracing::{debug, trace, warn};

/// Controller running against the simulator
pub type SimHost = Toshsd<SdmmcState, SimDelay>;

/// Driver on top of a simulated controller
pub fn driver(state: SdmmcState) -> Sdmmc<SimHost> {
    Sdmmc::new(Toshsd::new(state, SimDelay::default()))
}

pub fn driver_with_config(state: SdmmcState, config: DriverConfig) -> Sdmmc<SimHost> {
    Sdmmc::with_config(Toshsd::new(state, SimDelay::default()), config)
}

/// Delay that only advances a virtual clock
#[derive(Debug, Clone, Default)]
pub struct SimDelay {
    elapsed_ms: u64,
}

impl SimDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }
}

impl Delay for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.elapsed_ms += ms as u64;
    }
}

/// A command as the simulated controller dispatched it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    pub port: u8,
    pub index: u8,
    pub arg: u32,
    /// APP bit of the command register
    pub app: bool,
}

/// Data phase in progress
#[derive(Debug)]
struct Xfer {
    read: bool,
    blocks_left: u16,
    block_len: usize,
    block: Vec<u8>,
    pos: usize,
}

/// SDMMC controller state: register file plus the attached cards
#[derive(Debug)]
pub struct SdmmcState {
    // ========================================================================
    // REGISTER STATE
    // ========================================================================
    cmd: u16,
    portsel: u16,
    cmdarg0: u16,
    cmdarg1: u16,
    stop: u16,
    blkcount: u16,
    resp: [u16; 8],
    status0: u16,
    status1: u16,
    irq_mask0: u16,
    irq_mask1: u16,
    clkctl: u16,
    blklen: u16,
    opt: u16,
    data_ctl: u16,
    reset: u16,
    data32_ctl: u16,
    data32_blk_len: u16,
    data32_blk_count: u16,

    // ========================================================================
    // INTERNAL STATE
    // ========================================================================
    cards: [Option<SimCard>; NUM_PORTS],
    /// Write protect slider of the card slot
    slider: bool,
    xfer: Option<Xfer>,
    dma: Vec<u8>,
    dma_pos: usize,
    history: Vec<IssuedCommand>,
}

impl Default for SdmmcState {
    fn default() -> Self {
        Self::new()
    }
}

impl SdmmcState {
    /// Controller with both ports empty
    pub fn new() -> Self {
        Self {
            cmd: 0,
            portsel: 0,
            cmdarg0: 0,
            cmdarg1: 0,
            stop: 0,
            blkcount: 0,
            resp: [0; 8],
            status0: 0,
            status1: 0,
            irq_mask0: 0,
            irq_mask1: 0,
            clkctl: 0,
            blklen: 0,
            opt: 0,
            data_ctl: 0,
            reset: 0,
            data32_ctl: 0,
            data32_blk_len: 0,
            data32_blk_count: 0,

            cards: [None, None],
            slider: false,
            xfer: None,
            dma: Vec::new(),
            dma_pos: 0,
            history: Vec::new(),
        }
    }

    /// Insert a card into the card slot (port 0)
    pub fn with_card(mut self, card: SimCard) -> Self {
        self.insert(0, card);
        self
    }

    /// Solder an eMMC onto port 1
    pub fn with_emmc(mut self, card: SimCard) -> Self {
        self.insert(1, card);
        self
    }

    pub fn insert(&mut self, port: u8, card: SimCard) {
        debug!("SDMMC port {}: {:?} card attached", port, card.preset());
        self.cards[port as usize % NUM_PORTS] = Some(card);
    }

    pub fn remove(&mut self, port: u8) -> Option<SimCard> {
        self.cards[port as usize % NUM_PORTS].take()
    }

    pub fn card(&self, port: u8) -> Option<&SimCard> {
        self.cards[port as usize % NUM_PORTS].as_ref()
    }

    pub fn card_mut(&mut self, port: u8) -> Option<&mut SimCard> {
        self.cards[port as usize % NUM_PORTS].as_mut()
    }

    /// Move the card slot's write protect slider
    pub fn set_slider(&mut self, engaged: bool) {
        self.slider = engaged;
    }

    /// Memory the DMA engine reads from and writes to
    pub fn dma_window(&self) -> &[u8] {
        &self.dma
    }

    pub fn dma_window_mut(&mut self) -> &mut Vec<u8> {
        &mut self.dma
    }

    /// Every command dispatched since the last [`SdmmcState::clear_history`]
    pub fn history(&self) -> &[IssuedCommand] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Bus width currently programmed into the option register
    pub fn bus_width(&self) -> u8 {
        if self.opt & opt::BUS_WIDTH_1BIT != 0 { 1 } else { 4 }
    }

    /// Raw clock control register
    pub fn clkctl(&self) -> u16 {
        self.clkctl
    }

    fn port(&self) -> u8 {
        (self.portsel as usize).min(NUM_PORTS - 1) as u8
    }

    fn selected_card(&mut self) -> Option<&mut SimCard> {
        let port = self.port() as usize;
        self.cards[port].as_mut()
    }

    fn argument(&self) -> u32 {
        (self.cmdarg1 as u32) << 16 | self.cmdarg0 as u32
    }

    fn set_response_32(&mut self, value: u32) {
        self.resp = [0; 8];
        self.resp[0] = value as u16;
        self.resp[1] = (value >> 16) as u16;
    }

    /// R2: register bits 8..127 (CRC stripped)
    fn set_response_128(&mut self, register: u128) {
        let raw = register >> 8;
        for (i, half) in self.resp.iter_mut().enumerate() {
            *half = (raw >> (i * 16)) as u16;
        }
    }

    fn command_end(&mut self) {
        self.status1 &= !status1::CMD_BUSY;
        self.status0 |= status0::CMD_RESP_END;
    }

    fn soft_reset(&mut self) {
        self.status0 = 0;
        self.status1 = 0;
        self.resp = [0; 8];
        self.stop = 0;
        self.abort();
    }

    fn abort(&mut self) {
        if self.xfer.take().is_some() {
            debug!("SDMMC data phase aborted");
        }
        self.status1 &= !(status1::RXRDY | status1::TXRQ);
    }

    // ========================================================================
    // Command execution
    // ========================================================================

    fn execute(&mut self, bits: u16) {
        let index = (bits & cmd::INDEX_MASK) as u8;
        let arg = self.argument();
        let issued = IssuedCommand {
            port: self.port(),
            index,
            arg,
            app: bits & cmd::APP != 0,
        };
        debug!(
            "SDMMC command: {:#X} (port {}, {}CMD{}, arg={:#X})",
            bits,
            issued.port,
            if issued.app { "A" } else { "" },
            index,
            arg
        );
        self.history.push(issued);

        self.status1 |= status1::CMD_BUSY;
        let reply = match self.selected_card() {
            Some(card) => card.command(index, arg),
            None => Reply::Timeout,
        };

        if bits & cmd::RESP_MASK == cmd::RESP_NONE {
            self.command_end();
            return;
        }

        match reply {
            Reply::Short(value) => self.set_response_32(value),
            Reply::Long(register) => self.set_response_128(register),
            Reply::None | Reply::Timeout => {
                self.status1 &= !status1::CMD_BUSY;
                self.status1 |= status1::ERR_CMD_TIMEOUT;
                return;
            }
        }
        self.command_end();

        if bits & cmd::DATA_EN != 0 {
            self.start_data(bits & cmd::DATA_READ != 0);
        }
    }

    fn start_data(&mut self, read: bool) {
        let (blocks, block_len) = if self.data_ctl & data_ctl::DATA32_MODE != 0 {
            (self.data32_blk_count, self.data32_blk_len as usize)
        } else {
            (self.blkcount, self.blklen as usize)
        };
        debug!(
            "SDMMC {} {} block(s) of {} bytes",
            if read { "read" } else { "write" },
            blocks,
            block_len
        );

        self.xfer = Some(Xfer {
            read,
            blocks_left: blocks,
            block_len,
            block: Vec::with_capacity(block_len),
            pos: 0,
        });
        if read {
            self.load_block();
        } else {
            self.status1 |= status1::TXRQ;
        }
        self.service_dma();
    }

    fn data_error(&mut self, fault: DataFault) {
        self.status1 |= match fault {
            DataFault::Crc => status1::ERR_CRC,
            DataFault::Timeout => status1::ERR_DATA_TIMEOUT,
        };
        self.abort();
    }

    /// Fetch the next block from the card into the FIFO
    fn load_block(&mut self) {
        let Some(len) = self.xfer.as_ref().map(|x| x.block_len) else {
            return;
        };
        let result = match self.selected_card() {
            Some(card) => card.read_block(len),
            None => Err(DataFault::Timeout),
        };
        match result {
            Ok(block) => {
                if let Some(xfer) = self.xfer.as_mut() {
                    xfer.block = block;
                    xfer.pos = 0;
                }
                self.status1 |= status1::RXRDY;
            }
            Err(fault) => self.data_error(fault),
        }
    }

    fn block_done(&mut self) {
        let Some(xfer) = self.xfer.as_mut() else {
            return;
        };
        xfer.blocks_left = xfer.blocks_left.saturating_sub(1);
        xfer.pos = 0;
        xfer.block.clear();
        let (read, left) = (xfer.read, xfer.blocks_left);
        self.status1 &= !(status1::RXRDY | status1::TXRQ);

        if left == 0 {
            trace!("SDMMC all blocks transferred, setting DATAEND");
            self.xfer = None;
            self.status0 |= status0::DATA_END;
        } else if read {
            self.load_block();
        } else {
            self.status1 |= status1::TXRQ;
        }
    }

    // ========================================================================
    // FIFO data transfer
    // ========================================================================

    fn read_fifo32(&mut self) -> u32 {
        let Some(xfer) = self.xfer.as_mut().filter(|x| x.read) else {
            warn!("SDMMC FIFO32 read without a read in progress");
            return 0;
        };
        let mut word = [0u8; 4];
        if let Some(bytes) = xfer.block.get(xfer.pos..xfer.pos + 4) {
            word.copy_from_slice(bytes);
        }
        xfer.pos += 4;
        if xfer.pos >= xfer.block_len {
            self.block_done();
        }
        u32::from_le_bytes(word)
    }

    fn write_fifo32(&mut self, value: u32) {
        let Some(xfer) = self.xfer.as_mut().filter(|x| !x.read) else {
            warn!("SDMMC FIFO32 write without a write in progress");
            return;
        };
        xfer.block.extend_from_slice(&value.to_le_bytes());
        xfer.pos += 4;
        if xfer.pos < xfer.block_len {
            return;
        }

        let block = std::mem::take(&mut xfer.block);
        let result = match self.selected_card() {
            Some(card) => card.write_block(&block),
            None => Err(DataFault::Timeout),
        };
        match result {
            Ok(()) => self.block_done(),
            Err(fault) => self.data_error(fault),
        }
    }

    /// DMA engine: drain or fill the FIFO while it raises requests
    fn service_dma(&mut self) {
        if self.data32_ctl & data32_ctl::RX32_READY_IRQ != 0 {
            self.dma.clear();
            while self.status1 & status1::RXRDY != 0 {
                let word = self.read_fifo32();
                self.dma.extend_from_slice(&word.to_le_bytes());
            }
        } else if self.data32_ctl & data32_ctl::TX32_REQ_IRQ != 0 {
            self.dma_pos = 0;
            while self.status1 & status1::TXRQ != 0 {
                let mut word = [0u8; 4];
                if let Some(bytes) = self.dma.get(self.dma_pos..self.dma_pos + 4) {
                    word.copy_from_slice(bytes);
                }
                self.dma_pos += 4;
                self.write_fifo32(u32::from_le_bytes(word));
            }
        }
    }
}

impl RegisterBus for SdmmcState {
    fn write(&mut self, offset: u32, _size: usize, value: u32) {
        trace!(
            "SDMMC register write: offset={:#X}, value={:#X}",
            offset, value
        );

        match offset {
            reg::CMD => {
                self.cmd = value as u16;
                self.execute(self.cmd);
            }
            reg::PORTSEL => self.portsel = value as u16,
            reg::CMDARG0 => self.cmdarg0 = value as u16,
            reg::CMDARG1 => self.cmdarg1 = value as u16,
            reg::STOP => {
                self.stop = value as u16;
                if self.stop & stop::STOP != 0 {
                    self.abort();
                }
            }
            reg::BLKCOUNT => self.blkcount = value as u16,
            reg::STATUS0 => {
                // Write value as mask: bits set in value are kept, others cleared
                self.status0 &= value as u16;
            }
            reg::STATUS1 => {
                // FIFO flags are not acknowledged through this register
                let keep = value as u16 | status1::RXRDY | status1::TXRQ | status1::CMD_BUSY;
                self.status1 &= keep;
            }
            reg::IRQ_MASK0 => self.irq_mask0 = value as u16,
            reg::IRQ_MASK1 => self.irq_mask1 = value as u16,
            reg::CLKCTL => self.clkctl = value as u16,
            reg::BLKLEN => self.blklen = value as u16,
            reg::OPT => self.opt = value as u16,
            reg::DATA_CTL => self.data_ctl = value as u16,
            reg::RESET => {
                self.reset = value as u16;
                if self.reset & reset::RELEASE == 0 {
                    debug!("SDMMC reset");
                    self.soft_reset();
                }
            }
            reg::DATA32_CTL => {
                let value = value as u16;
                if value & data32_ctl::FIFO_CLEAR != 0 {
                    self.abort();
                }
                self.data32_ctl = value & !data32_ctl::FIFO_CLEAR;
            }
            reg::DATA32_BLK_LEN => self.data32_blk_len = value as u16,
            reg::DATA32_BLK_COUNT => self.data32_blk_count = value as u16,
            reg::DATA32_FIFO => self.write_fifo32(value),
            _ => {
                warn!(
                    "Unknown SDMMC register write: offset={:#X}, value={:#X}",
                    offset, value
                );
            }
        }
    }

    fn read(&mut self, offset: u32, _size: usize) -> u32 {
        let value = match offset {
            reg::CMD => self.cmd,
            reg::PORTSEL => self.portsel,
            reg::CMDARG0 => self.cmdarg0,
            reg::CMDARG1 => self.cmdarg1,
            reg::STOP => self.stop,
            reg::BLKCOUNT => self.blkcount,
            reg::RESP0..=reg::RESP7 => self.resp[((offset - reg::RESP0) / 2) as usize],
            reg::STATUS0 => {
                let port = self.port();
                let mut status = self.status0;
                if self.cards[port as usize].is_some() {
                    status |= status0::CARD_PRESENT;
                }
                if !(port == 0 && self.slider) {
                    status |= status0::WRITE_ENABLED;
                }
                status
            }
            reg::STATUS1 => self.status1,
            reg::IRQ_MASK0 => self.irq_mask0,
            reg::IRQ_MASK1 => self.irq_mask1,
            reg::CLKCTL => self.clkctl,
            reg::BLKLEN => self.blklen,
            reg::OPT => self.opt,
            reg::DATA_CTL => self.data_ctl,
            reg::RESET => self.reset,
            reg::DATA32_CTL => {
                let mut value = self.data32_ctl;
                if self.status1 & status1::RXRDY != 0 {
                    value |= data32_ctl::RX32_READY;
                }
                // Inverted: clear when the FIFO accepts the next block
                if self.status1 & status1::TXRQ == 0 {
                    value |= data32_ctl::TX32_FULL;
                }
                value
            }
            reg::DATA32_BLK_LEN => self.data32_blk_len,
            reg::DATA32_BLK_COUNT => self.data32_blk_count,
            reg::DATA32_FIFO => return self.read_fifo32(),
            _ => {
                warn!("Unknown SDMMC register read: offset={:#X}", offset);
                0
            }
        };
        trace!("SDMMC register read: offset={:#X} -> {:#X}", offset, value);
        value as u32
    }
}
