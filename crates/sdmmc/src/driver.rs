//! Device slot table and the driver entry points.

use crate::card::{CardKind, CardState, CardStatus, WriteProtect};
use crate::config::DriverConfig;
use crate::error::{HostError, SdmmcError};
use crate::host::{Command, Controller, Response, ResponseKind, Transfer};
use crate::{init, transfer, tuning};
use sdmmc_hw::protocol::{arg, cmd};
use tracing::{debug, info, instrument, warn};

/// SEND_STATUS polls while a card is still programming
const PROGRAMMING_POLLS: u32 = 1000;

/// Physical port a device slot is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Device {
    /// Removable SD card slot
    Card = 0,
    /// Soldered eMMC
    Emmc = 1,
}

impl Device {
    pub fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Device {
    type Error = SdmmcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Device::Card),
            1 => Ok(Device::Emmc),
            _ => Err(SdmmcError::InvalParam),
        }
    }
}

/// How the card interprets the data address argument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Addressing {
    /// Byte offset (SDSC, low density MMC)
    Byte,
    /// Sector number
    #[default]
    Block,
}

/// Copy of a device slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DevInfo {
    pub kind: CardKind,
    pub wr_prot: WriteProtect,
    pub rca: u16,
    /// Capacity in 512-byte sectors
    pub sectors: u32,
    /// Bus clock in Hz
    pub clock: u32,
    /// CID register, CRC stripped
    pub cid: [u32; 4],
    pub ccc: u16,
    /// 1 or 4 (0 when absent)
    pub bus_width: u8,
    pub addressing: Addressing,
}

/// Per-device state. All zero while the device is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Slot {
    pub kind: CardKind,
    pub wr_prot: WriteProtect,
    pub rca: u16,
    pub sectors: u32,
    pub clock: u32,
    pub cid: [u32; 4],
    pub ccc: u16,
    pub bus_width: u8,
    /// Multi-block transfers are preceded by SET_BLOCK_COUNT
    pub cmd23: bool,
}

impl Slot {
    pub fn is_present(&self) -> bool {
        self.kind != CardKind::None
    }

    pub fn info(&self) -> DevInfo {
        DevInfo {
            kind: self.kind,
            wr_prot: self.wr_prot,
            rca: self.rca,
            sectors: self.sectors,
            clock: self.clock,
            cid: self.cid,
            ccc: self.ccc,
            bus_width: self.bus_width,
            addressing: if self.kind.byte_addressed() {
                Addressing::Byte
            } else {
                Addressing::Block
            },
        }
    }
}

/// SD/MMC driver: one controller, two device slots
pub struct Sdmmc<C> {
    ctrl: C,
    slots: [Slot; 2],
    config: DriverConfig,
}

impl<C: Controller> Sdmmc<C> {
    pub fn new(ctrl: C) -> Self {
        Self::with_config(ctrl, DriverConfig::default())
    }

    pub fn with_config(ctrl: C, config: DriverConfig) -> Self {
        Self {
            ctrl,
            slots: [Slot::default(); 2],
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn controller(&self) -> &C {
        &self.ctrl
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.ctrl
    }

    /// Bring a device from power-on to transfer state
    #[instrument(skip(self))]
    pub fn init(&mut self, dev: u8) -> Result<(), SdmmcError> {
        let dev = Device::try_from(dev)?;
        if self.slots[dev.index()].is_present() {
            return Err(SdmmcError::Initialized);
        }

        match self.bring_up(dev) {
            Ok(slot) => {
                info!(
                    "{:?}: {:?}, {} sectors, {} Hz, {}-bit bus, RCA {:#06X}",
                    dev, slot.kind, slot.sectors, slot.clock, slot.bus_width, slot.rca
                );
                self.slots[dev.index()] = slot;
                Ok(())
            }
            Err(e) => {
                warn!("{:?}: init failed: {}", dev, e);
                self.ctrl.select_port(dev as u8);
                self.ctrl.reset();
                self.slots[dev.index()] = Slot::default();
                Err(e)
            }
        }
    }

    fn bring_up(&mut self, dev: Device) -> Result<Slot, SdmmcError> {
        let mut probe = init::identify(&mut self.ctrl, dev, &self.config)?;
        tuning::tune(&mut self.ctrl, &mut probe, &self.config)?;
        Ok(probe.slot)
    }

    /// Forget a device. The card itself is left as is.
    #[instrument(skip(self))]
    pub fn deinit(&mut self, dev: u8) -> Result<(), SdmmcError> {
        let dev = Device::try_from(dev)?;
        if self.slots[dev.index()].is_present() {
            debug!("{:?}: deinit", dev);
        }
        self.slots[dev.index()] = Slot::default();
        Ok(())
    }

    /// Descriptor of a device, all zero when absent
    pub fn dev_info(&self, dev: u8) -> Result<DevInfo, SdmmcError> {
        let dev = Device::try_from(dev)?;
        Ok(self.slots[dev.index()].info())
    }

    /// Raw CID register, all zero when absent
    pub fn cid(&self, dev: u8) -> Result<[u32; 4], SdmmcError> {
        let dev = Device::try_from(dev)?;
        Ok(self.slots[dev.index()].cid)
    }

    /// Write protection bits including a fresh read of the slider, 0xFF when absent
    pub fn write_prot_bits(&mut self, dev: u8) -> u8 {
        let Ok(dev) = Device::try_from(dev) else {
            return 0xff;
        };
        if !self.slots[dev.index()].is_present() {
            return 0xff;
        }
        self.write_protect(dev).bits()
    }

    /// Capacity in sectors, 0 when absent
    pub fn sectors(&self, dev: u8) -> u32 {
        Device::try_from(dev).map_or(0, |dev| self.slots[dev.index()].sectors)
    }

    /// Read `count` sectors starting at `sect`.
    ///
    /// With `buf` set to `None` the data goes through the controller's DMA path.
    #[instrument(skip(self, buf))]
    pub fn read_sectors(
        &mut self,
        dev: u8,
        sect: u32,
        buf: Option<&mut [u32]>,
        count: u16,
    ) -> Result<(), SdmmcError> {
        let dev = Device::try_from(dev)?;
        let slot = self.slots[dev.index()];
        if !slot.is_present() {
            return Err(SdmmcError::NoCard);
        }
        self.ctrl.select_port(dev as u8);
        transfer::read(&mut self.ctrl, &slot, &self.config, sect, buf, count)
    }

    /// Write `count` sectors starting at `sect`.
    ///
    /// With `buf` set to `None` the data comes from the controller's DMA path.
    #[instrument(skip(self, buf))]
    pub fn write_sectors(
        &mut self,
        dev: u8,
        sect: u32,
        buf: Option<&[u32]>,
        count: u16,
    ) -> Result<(), SdmmcError> {
        let dev = Device::try_from(dev)?;
        let slot = self.slots[dev.index()];
        if !slot.is_present() {
            return Err(SdmmcError::NoCard);
        }
        self.ctrl.select_port(dev as u8);
        let wp = self.write_protect(dev);
        transfer::write(&mut self.ctrl, &slot, wp, sect, buf, count)
    }

    /// Stored protection bits ORed with the current slider position
    fn write_protect(&mut self, dev: Device) -> WriteProtect {
        let mut wp = self.slots[dev.index()].wr_prot;
        self.ctrl.select_port(dev as u8);
        if slider_engaged(&mut self.ctrl, dev) {
            wp |= WriteProtect::SLIDER;
        }
        wp
    }
}

/// Only the removable slot has a slider
pub(crate) fn slider_engaged<C: Controller>(ctrl: &mut C, dev: Device) -> bool {
    dev == Device::Card && ctrl.write_protect_slider()
}

pub(crate) fn command<C: Controller>(
    ctrl: &mut C,
    index: u8,
    argument: u32,
    response: ResponseKind,
) -> Result<Response, HostError> {
    ctrl.issue(&Command::new(index, argument, response), None)
}

/// APP_CMD followed by an application specific command
pub(crate) fn app_command<C: Controller>(
    ctrl: &mut C,
    rca: u16,
    acmd: Command,
    data: Option<Transfer<'_>>,
) -> Result<Response, HostError> {
    command(ctrl, cmd::APP_CMD, arg::rca(rca), ResponseKind::R1)?;
    ctrl.issue(&acmd, data)
}

pub(crate) fn send_status<C: Controller>(ctrl: &mut C, rca: u16) -> Result<CardStatus, HostError> {
    command(ctrl, cmd::SEND_STATUS, arg::rca(rca), ResponseKind::R1).map(|r| r.r1())
}

/// SEND_STATUS until the card leaves the programming state.
///
/// Error bits are cleared on read, so the ones seen while polling are
/// carried into the returned status.
pub(crate) fn settled_status<C: Controller>(
    ctrl: &mut C,
    rca: u16,
) -> Result<CardStatus, HostError> {
    let sticky = CardStatus::TRANSFER_ERRORS | CardStatus::SWITCH_ERROR;
    let mut status = send_status(ctrl, rca)?;
    let mut seen = status & sticky;
    for _ in 0..PROGRAMMING_POLLS {
        if status.state() != CardState::Prg {
            break;
        }
        ctrl.delay_ms(1);
        status = send_status(ctrl, rca)?;
        seen |= status & sticky;
    }
    Ok(status | seen)
}
