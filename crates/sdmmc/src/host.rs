//! Controller primitive consumed by the driver.
//!
//! A controller sends one command, moves the data blocks that belong to it
//! and hands back the response words. It also owns the card clock, the bus
//! width register and the card detect / write protect pins.

use crate::card::CardStatus;
use crate::error::HostError;

/// Shape of the response a command expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None,
    /// Normal response, card status
    R1,
    /// R1 with busy signalling on DAT0
    R1b,
    /// 136-bit CID/CSD response
    R2,
    /// OCR, no CRC
    R3,
    /// Published RCA (SD)
    R6,
    /// Interface condition (SD)
    R7,
}

/// Data direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Card to host
    Read,
    /// Host to card
    Write,
}

/// Where the data of a transfer comes from or goes to
#[derive(Debug)]
pub enum Buffer<'a> {
    /// Receive into a caller supplied, word aligned buffer
    Read(&'a mut [u32]),
    /// Send from a caller supplied, word aligned buffer
    Write(&'a [u32]),
    /// The controller's DMA path services the FIFO
    Dma(Direction),
}

impl Buffer<'_> {
    pub fn direction(&self) -> Direction {
        match self {
            Buffer::Read(_) => Direction::Read,
            Buffer::Write(_) => Direction::Write,
            Buffer::Dma(dir) => *dir,
        }
    }
}

/// Data phase of a command
#[derive(Debug)]
pub struct Transfer<'a> {
    pub blocks: u16,
    pub block_size: u16,
    pub buffer: Buffer<'a>,
}

impl<'a> Transfer<'a> {
    pub fn new(blocks: u16, block_size: u16, buffer: Buffer<'a>) -> Self {
        Self {
            blocks,
            block_size,
            buffer,
        }
    }

    /// Number of 32-bit words the whole transfer moves
    pub fn words(&self) -> usize {
        self.blocks as usize * self.block_size as usize / 4
    }
}

/// A command as it goes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub arg: u32,
    pub response: ResponseKind,
    /// Application specific command (must follow APP_CMD)
    pub app: bool,
}

impl Command {
    pub const fn new(index: u8, arg: u32, response: ResponseKind) -> Self {
        Self {
            index,
            arg,
            response,
            app: false,
        }
    }

    pub const fn app(index: u8, arg: u32, response: ResponseKind) -> Self {
        Self {
            index,
            arg,
            response,
            app: true,
        }
    }
}

/// Response words of a completed command.
///
/// For R2 the four words hold register bits 8..127 with the CRC stripped,
/// word 0 least significant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Response {
    pub words: [u32; 4],
}

impl Response {
    pub fn r1(&self) -> CardStatus {
        CardStatus::from_bits_retain(self.words[0])
    }

    pub fn ocr(&self) -> u32 {
        self.words[0]
    }

    /// RCA published by an SD card in an R6 response
    pub fn r6_rca(&self) -> u16 {
        (self.words[0] >> 16) as u16
    }

    pub fn r7(&self) -> u32 {
        self.words[0]
    }

    pub fn r2(&self) -> [u32; 4] {
        self.words
    }
}

/// Data bus width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusWidth {
    One = 1,
    Four = 4,
}

/// Synchronous SD/MMC host controller
pub trait Controller {
    /// Route the following operations to `port` (0 = card slot, 1 = eMMC)
    fn select_port(&mut self, port: u8);

    /// Reset the selected port to identification settings (400 kHz, 1-bit)
    fn reset(&mut self);

    /// Send a command and run its data phase. Blocks until the controller is idle again.
    fn issue(&mut self, cmd: &Command, data: Option<Transfer<'_>>) -> Result<Response, HostError>;

    /// Program the card clock to at most `hz`. Returns the frequency actually programmed.
    fn set_clock(&mut self, hz: u32) -> u32;

    fn set_bus_width(&mut self, width: BusWidth);

    fn card_present(&mut self) -> bool;

    /// State of the SD card's write protect slider
    fn write_protect_slider(&mut self) -> bool;

    /// Busy wait for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);
}

/// Millisecond busy wait used by register-level controllers
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

impl<F: FnMut(u32)> Delay for F {
    fn delay_ms(&mut self, ms: u32) {
        self(ms)
    }
}

/// Calibrated spin loop, for targets without a timer driver
#[derive(Debug, Clone, Copy)]
pub struct SpinDelay {
    pub spins_per_ms: u32,
}

impl Delay for SpinDelay {
    fn delay_ms(&mut self, ms: u32) {
        for _ in 0..ms.saturating_mul(self.spins_per_ms) {
            core::hint::spin_loop();
        }
    }
}
