//! Simulated SD and (e)MMC cards.
//!
//! A card answers bus commands the way the physical layer specifications
//! describe and keeps its sectors in memory or in an image file.

use crate::card::{CardState, CardStatus};
use sdmmc_hw::protocol::{SECTOR_SIZE, acmd, arg, cmd, csd, ext_csd, ocr, switch_status};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, trace, warn};

/// RCA an SD card publishes
const SD_RCA: u16 = 0xb368;

/// 2.7-3.6 V
const DEFAULT_VDD_WINDOW: u32 = 0x00ff_8000;

/// eMMC also reports the 1.70-1.95 V range (bit 7)
const EMMC_VDD_WINDOW: u32 = 0x00ff_8080;

const SD_CID: u128 = 0x1b53_4d53_494d_3031_1012_3456_7801_6a01;
const MMC_CID: u128 = 0x1501_0053_494d_4d43_2010_7654_3210_c601;

/// What the card puts on the CMD line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted without a response
    None,
    /// Command not answered
    Timeout,
    /// 32-bit payload of a 48-bit response (R1, R3, R6, R7)
    Short(u32),
    /// Full 128-bit register of an R2 response, CRC included
    Long(u128),
}

/// Data block failure as the host sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFault {
    Crc,
    Timeout,
}

/// Card flavours the simulator can model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// SD 1.x standard capacity, does not know SEND_IF_COND
    SdscV1,
    /// SD 2.0 standard capacity
    Sdsc,
    /// SDHC / SDXC
    Sdhc,
    /// SD ultra capacity
    Sduc,
    /// MMC 3.x, byte addressed, no EXT_CSD
    LegacyMmc,
    /// eMMC 4.x+, sector addressed
    Emmc,
}

impl Preset {
    pub fn is_sd(self) -> bool {
        matches!(
            self,
            Preset::SdscV1 | Preset::Sdsc | Preset::Sdhc | Preset::Sduc
        )
    }

    pub fn byte_addressed(self) -> bool {
        matches!(self, Preset::SdscV1 | Preset::Sdsc | Preset::LegacyMmc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IfCond {
    Echo,
    Corrupt,
}

enum Storage {
    Sparse(BTreeMap<u64, Box<[u8; SECTOR_SIZE]>>),
    Image(File),
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Sparse(map) => write!(f, "Sparse({} sectors written)", map.len()),
            Storage::Image(file) => write!(f, "Image({:?})", file),
        }
    }
}

impl Storage {
    fn read(&mut self, sector: u64, out: &mut [u8]) -> io::Result<()> {
        out.fill(0);
        match self {
            Storage::Sparse(map) => {
                if let Some(data) = map.get(&sector) {
                    let n = out.len().min(SECTOR_SIZE);
                    out[..n].copy_from_slice(&data[..n]);
                }
                Ok(())
            }
            Storage::Image(file) => {
                file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
                // Reads past the end of the image return zeros
                let mut filled = 0;
                while filled < out.len() {
                    match file.read(&mut out[filled..])? {
                        0 => break,
                        n => filled += n,
                    }
                }
                Ok(())
            }
        }
    }

    fn write(&mut self, sector: u64, data: &[u8]) -> io::Result<()> {
        match self {
            Storage::Sparse(map) => {
                let mut block = Box::new([0u8; SECTOR_SIZE]);
                let n = data.len().min(SECTOR_SIZE);
                block[..n].copy_from_slice(&data[..n]);
                map.insert(sector, block);
                Ok(())
            }
            Storage::Image(file) => {
                file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))?;
                file.write_all(data)?;
                file.flush()
            }
        }
    }
}

/// Data phase the card is in
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stream {
    /// Register sized block (SCR, SD status, SWITCH status, EXT_CSD)
    Register(Vec<u8>),
    Read { next: u64, remaining: Option<u32> },
    Write { next: u64, remaining: Option<u32> },
}

/// A simulated card
#[derive(Debug)]
pub struct SimCard {
    preset: Preset,
    sectors: u64,
    v1_geometry: (u32, u32, u32),
    storage: Storage,

    state: CardState,
    rca: u16,
    app_cmd: bool,
    /// Error bits reported (and cleared) by the next status response
    pending: CardStatus,
    block_count: Option<u32>,
    stream: Option<Stream>,
    bus_width: u8,
    high_speed_timing: bool,

    vdd_window: u32,
    busy_polls: u32,
    never_ready: bool,
    if_cond: IfCond,
    locked: bool,
    perm_write_protect: bool,
    tmp_write_protect: bool,
    supports_high_speed: bool,
    supports_cmd23: bool,
    supports_4bit: bool,
    crc_failures: u32,
    lost_stops: u32,
    ecc_errors: Option<Range<u64>>,
}

impl SimCard {
    fn new(preset: Preset, sectors: u64) -> Self {
        let (sectors, v1_geometry) = match preset {
            Preset::Sdhc | Preset::Sduc => (sectors.max(1024) / 1024 * 1024, (0, 0, 0)),
            Preset::Emmc => (sectors.max(1), (csd::MMC_C_SIZE_EXTENDED, 7, 9)),
            _ => {
                let (c_size, mult, bl_len, actual) = v1_geometry(sectors);
                (actual, (c_size, mult, bl_len))
            }
        };
        Self {
            preset,
            sectors,
            v1_geometry,
            storage: Storage::Sparse(BTreeMap::new()),
            state: CardState::Idle,
            rca: 0,
            app_cmd: false,
            pending: CardStatus::empty(),
            block_count: None,
            stream: None,
            bus_width: 1,
            high_speed_timing: false,
            vdd_window: if preset == Preset::Emmc {
                EMMC_VDD_WINDOW
            } else {
                DEFAULT_VDD_WINDOW
            },
            busy_polls: 0,
            never_ready: false,
            if_cond: IfCond::Echo,
            locked: false,
            perm_write_protect: false,
            tmp_write_protect: false,
            supports_high_speed: preset != Preset::LegacyMmc,
            supports_cmd23: matches!(preset, Preset::Sdhc | Preset::Sduc),
            supports_4bit: true,
            crc_failures: 0,
            lost_stops: 0,
            ecc_errors: None,
        }
    }

    /// SDHC/SDXC card, capacity rounded down to a multiple of 1024 sectors
    pub fn sdhc(sectors: u64) -> Self {
        Self::new(Preset::Sdhc, sectors)
    }

    /// SD 2.0 standard capacity card, capacity rounded to what a version 1 CSD can express
    pub fn sdsc(sectors: u64) -> Self {
        Self::new(Preset::Sdsc, sectors)
    }

    /// SD 1.x card that does not answer SEND_IF_COND
    pub fn sdsc_v1(sectors: u64) -> Self {
        Self::new(Preset::SdscV1, sectors)
    }

    /// SDUC card
    pub fn sduc(sectors: u64) -> Self {
        Self::new(Preset::Sduc, sectors)
    }

    /// eMMC with its capacity in EXT_CSD
    pub fn emmc(sectors: u64) -> Self {
        Self::new(Preset::Emmc, sectors)
    }

    /// Pre-4.0 MMC without EXT_CSD or SWITCH
    pub fn legacy_mmc(sectors: u64) -> Self {
        Self::new(Preset::LegacyMmc, sectors)
    }

    /// Back the card with an image file instead of memory
    pub fn with_image(mut self, path: &Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        debug!("Opened card image: {:?}", path);
        self.storage = Storage::Image(file);
        Ok(self)
    }

    pub fn permanent_write_protect(mut self) -> Self {
        self.perm_write_protect = true;
        self
    }

    pub fn temporary_write_protect(mut self) -> Self {
        self.tmp_write_protect = true;
        self
    }

    /// Password locked card
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// Report busy for the first `polls` OP_COND commands
    pub fn busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    /// Never finish power-up
    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Echo a wrong check pattern to SEND_IF_COND
    pub fn corrupt_if_cond(mut self) -> Self {
        self.if_cond = IfCond::Corrupt;
        self
    }

    /// Supported voltage window (OCR bits 23:8)
    pub fn vdd_window(mut self, window: u32) -> Self {
        self.vdd_window = window;
        self
    }

    /// Fail the CRC of the next `blocks` data blocks sent to the host
    pub fn read_crc_failures(mut self, blocks: u32) -> Self {
        self.crc_failures = blocks;
        self
    }

    /// Leave the next `count` STOP_TRANSMISSION commands unanswered; the card
    /// stays in its data state
    pub fn lost_stop_responses(mut self, count: u32) -> Self {
        self.lost_stops = count;
        self
    }

    /// Flag an uncorrectable ECC error when any of these sectors is read
    pub fn ecc_errors(mut self, sectors: Range<u64>) -> Self {
        self.ecc_errors = Some(sectors);
        self
    }

    /// Refuse high speed timing
    pub fn without_high_speed(mut self) -> Self {
        self.supports_high_speed = false;
        self
    }

    /// Do not advertise or accept SET_BLOCK_COUNT
    pub fn without_cmd23(mut self) -> Self {
        self.supports_cmd23 = false;
        self
    }

    /// Only a 1-bit bus
    pub fn one_bit_only(mut self) -> Self {
        self.supports_4bit = false;
        self
    }

    pub fn preset(&self) -> Preset {
        self.preset
    }

    /// Capacity in sectors as the card reports it
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn bus_width(&self) -> u8 {
        self.bus_width
    }

    pub fn high_speed_timing(&self) -> bool {
        self.high_speed_timing
    }

    pub fn cid(&self) -> u128 {
        if self.preset.is_sd() { SD_CID } else { MMC_CID }
    }

    /// Contents of a sector, bypassing the bus
    pub fn peek(&mut self, sector: u64) -> Vec<u8> {
        let mut data = vec![0u8; SECTOR_SIZE];
        if let Err(e) = self.storage.read(sector, &mut data) {
            warn!("Failed to read sector {}: {}", sector, e);
        }
        data
    }

    /// Overwrite a sector, bypassing the bus
    pub fn poke(&mut self, sector: u64, data: &[u8]) {
        if let Err(e) = self.storage.write(sector, data) {
            warn!("Failed to write sector {}: {}", sector, e);
        }
    }

    // ========================================================================
    // Registers
    // ========================================================================

    fn status(&self, app: bool) -> CardStatus {
        let mut status = self.pending.with_state(self.state);
        if matches!(self.state, CardState::Stby | CardState::Tran) {
            status |= CardStatus::READY_FOR_DATA;
        }
        if self.locked {
            status |= CardStatus::CARD_IS_LOCKED;
        }
        if app {
            status |= CardStatus::APP_CMD;
        }
        status
    }

    /// R1 payload; reading it clears the reported error bits
    fn r1(&mut self, app: bool) -> Reply {
        let status = self.status(app);
        self.pending = CardStatus::empty();
        Reply::Short(status.bits())
    }

    fn ocr(&self, ready: bool, high_capacity: bool) -> u32 {
        let mut value = self.vdd_window;
        if ready {
            value |= ocr::READY;
            if high_capacity {
                value |= ocr::CCS;
            }
        }
        value
    }

    fn csd(&self) -> u128 {
        let mut reg = 1u128;
        let structure = match self.preset {
            Preset::SdscV1 | Preset::Sdsc => 0,
            Preset::Sdhc => 1,
            Preset::Sduc => 2,
            Preset::LegacyMmc => 2,
            Preset::Emmc => 3,
        };
        put(&mut reg, csd::STRUCTURE, 2, structure);
        // TAAC, NSAC
        put(&mut reg, 112, 8, 0x0e);
        put(&mut reg, csd::TRAN_SPEED, 8, if self.preset.is_sd() { 0x32 } else { 0x2a });
        put(&mut reg, csd::PERM_WRITE_PROTECT, 1, self.perm_write_protect as u128);
        put(&mut reg, csd::TMP_WRITE_PROTECT, 1, self.tmp_write_protect as u128);
        // WRITE_BL_LEN
        put(&mut reg, 22, 4, 9);

        match self.preset {
            Preset::Sdhc | Preset::Sduc => {
                let width = if self.preset == Preset::Sduc { 28 } else { 22 };
                put(&mut reg, csd::CCC, 12, 0x5b5);
                put(&mut reg, csd::READ_BL_LEN, 4, 9);
                put(&mut reg, csd::V2_C_SIZE, width, (self.sectors / 1024 - 1) as u128);
            }
            _ => {
                let (c_size, mult, bl_len) = self.v1_geometry;
                let ccc = if self.preset.is_sd() { 0x5b5 } else { 0x0f5 };
                put(&mut reg, csd::CCC, 12, ccc);
                put(&mut reg, csd::READ_BL_LEN, 4, bl_len as u128);
                put(&mut reg, csd::V1_C_SIZE, 12, c_size as u128);
                put(&mut reg, csd::V1_C_SIZE_MULT, 3, mult as u128);
                if !self.preset.is_sd() {
                    let vers = if self.preset == Preset::Emmc { 4 } else { 3 };
                    put(&mut reg, csd::MMC_SPEC_VERS, 4, vers);
                }
            }
        }
        reg
    }

    fn scr(&self) -> Vec<u8> {
        let (spec, widths) = match self.preset {
            Preset::SdscV1 => (0x00, 0x01),
            _ => (0x02, 0x01),
        };
        let widths = if self.supports_4bit { widths | 0x04 } else { widths };
        let cmd_support = if self.supports_cmd23 { 0x02 } else { 0x00 };
        vec![spec, 0x30 | widths, 0x80, cmd_support, 0, 0, 0, 0]
    }

    fn switch_status(&mut self, argument: u32) -> Vec<u8> {
        let mut status = vec![0u8; switch_status::SIZE];
        // Maximum current 100 mA
        status[1] = 0x64;
        // Group 1 supports default and, if capable, high speed
        status[13] = if self.supports_high_speed { 0x03 } else { 0x01 };
        status[12] = 0x80;

        let requested = (argument & 0xf) as u8;
        let current = self.high_speed_timing as u8;
        let selected = match requested {
            0xf => current,
            0 => 0,
            switch_status::FUNC_HIGH_SPEED if self.supports_high_speed => 1,
            _ => 0xf,
        };
        status[switch_status::GROUP1_SELECTED_BYTE] = selected;

        let set = argument & (1 << 31) != 0;
        if set && selected != 0xf {
            self.high_speed_timing = selected == switch_status::FUNC_HIGH_SPEED;
        }
        status
    }

    fn ext_csd(&self) -> Vec<u8> {
        let mut raw = vec![0u8; ext_csd::SIZE];
        let sec_count = u32::try_from(self.sectors).unwrap_or(u32::MAX);
        raw[ext_csd::SEC_COUNT..ext_csd::SEC_COUNT + 4].copy_from_slice(&sec_count.to_le_bytes());
        raw[ext_csd::CARD_TYPE] = if self.supports_high_speed {
            ext_csd::CARD_TYPE_HS_26 | ext_csd::CARD_TYPE_HS_52
        } else {
            0
        };
        raw[ext_csd::HS_TIMING as usize] = self.high_speed_timing as u8;
        raw[ext_csd::BUS_WIDTH as usize] = if self.bus_width == 4 { ext_csd::BUS_WIDTH_4 } else { 0 };
        // EXT_CSD_REV, CSD_STRUCTURE
        raw[192] = 5;
        raw[194] = 2;
        raw
    }

    // ========================================================================
    // Command execution
    // ========================================================================

    /// Execute a bus command
    pub fn command(&mut self, index: u8, argument: u32) -> Reply {
        let app = std::mem::take(&mut self.app_cmd);
        if app && let Some(reply) = self.execute_acmd(index, argument) {
            trace!("SimCard ACMD{} arg={:#X} -> {:?}", index, argument, reply);
            return reply;
        }
        let reply = self.execute_cmd(index, argument);
        trace!("SimCard CMD{} arg={:#X} -> {:?}", index, argument, reply);
        reply
    }

    fn addressed(&self, argument: u32) -> bool {
        (argument >> 16) as u16 == self.rca
    }

    fn execute_cmd(&mut self, index: u8, argument: u32) -> Reply {
        use CardState::*;
        let sd = self.preset.is_sd();

        match (index, self.state) {
            (cmd::GO_IDLE_STATE, _) => {
                self.go_idle();
                Reply::None
            }
            (cmd::SEND_OP_COND, Idle | Ready) if !sd => self.op_cond(argument, true),
            (cmd::ALL_SEND_CID, Ready) => {
                self.state = Ident;
                Reply::Long(self.cid())
            }
            (cmd::SET_RELATIVE_ADDR, Ident | Stby) if sd => {
                let status = self.status(false);
                self.rca = SD_RCA;
                self.state = Stby;
                // R6 carries status bits 23, 22, 19 and 12:0
                let bits = status.bits();
                let r6 = ((bits >> 8) & 0xc000) | ((bits >> 6) & 0x2000) | (bits & 0x1fff);
                Reply::Short((self.rca as u32) << 16 | r6)
            }
            (cmd::SET_RELATIVE_ADDR, Ident) => {
                let reply = self.r1(false);
                self.rca = (argument >> 16) as u16;
                self.state = Stby;
                reply
            }
            (cmd::SWITCH, Tran) if sd => {
                let reply = self.r1(false);
                let status = self.switch_status(argument);
                self.start(Stream::Register(status));
                reply
            }
            (cmd::SWITCH, Tran) => {
                let reply = self.r1(false);
                self.mmc_switch(argument);
                self.state = Prg;
                reply
            }
            (cmd::SELECT_CARD, Stby) if self.addressed(argument) => {
                let reply = self.r1(false);
                self.state = Tran;
                reply
            }
            (cmd::SELECT_CARD, Tran | Data | Prg) if !self.addressed(argument) => {
                self.state = Stby;
                Reply::None
            }
            (cmd::SEND_IF_COND, Idle) if sd && self.preset != Preset::SdscV1 => {
                let echo = argument & (arg::IF_COND_VHS_MASK | 0xff);
                Reply::Short(match self.if_cond {
                    IfCond::Echo => echo,
                    IfCond::Corrupt => (echo & arg::IF_COND_VHS_MASK) | 0x55,
                })
            }
            (cmd::SEND_EXT_CSD, Tran) if self.preset == Preset::Emmc => {
                let reply = self.r1(false);
                let raw = self.ext_csd();
                self.start(Stream::Register(raw));
                reply
            }
            (cmd::SEND_CSD, Stby) if self.addressed(argument) => Reply::Long(self.csd()),
            (cmd::SEND_CID, Stby) if self.addressed(argument) => Reply::Long(self.cid()),
            (cmd::STOP_TRANSMISSION, Data | Rcv) if self.lost_stops > 0 => {
                self.lost_stops -= 1;
                Reply::Timeout
            }
            (cmd::STOP_TRANSMISSION, Data | Rcv) => {
                let reply = self.r1(false);
                self.stream = None;
                self.state = if self.state == Rcv { Prg } else { Tran };
                reply
            }
            (cmd::SEND_STATUS, Stby | Tran | Data | Rcv | Prg | Dis) if self.addressed(argument) => {
                let reply = self.r1(false);
                if self.state == Prg {
                    self.state = Tran;
                }
                reply
            }
            (cmd::SET_BLOCKLEN, Tran) => {
                if argument != SECTOR_SIZE as u32 {
                    self.pending |= CardStatus::BLOCK_LEN_ERROR;
                }
                self.r1(false)
            }
            (cmd::READ_SINGLE_BLOCK | cmd::READ_MULTIPLE_BLOCK, Tran) => {
                let single = index == cmd::READ_SINGLE_BLOCK;
                self.begin_data(argument, single, false)
            }
            (cmd::WRITE_BLOCK | cmd::WRITE_MULTIPLE_BLOCK, Tran) => {
                let single = index == cmd::WRITE_BLOCK;
                self.begin_data(argument, single, true)
            }
            (cmd::SET_BLOCK_COUNT, Tran) if !sd || self.supports_cmd23 => {
                self.block_count = Some(argument & 0xffff);
                self.r1(false)
            }
            (cmd::APP_CMD, Idle | Ready | Ident) if sd => {
                self.app_cmd = true;
                self.r1(true)
            }
            (cmd::APP_CMD, _) if sd && self.addressed(argument) => {
                self.app_cmd = true;
                self.r1(true)
            }
            _ => {
                debug!(
                    "SimCard: CMD{} not accepted in {:?} state",
                    index, self.state
                );
                Reply::Timeout
            }
        }
    }

    /// `None` when the index is no application command; the card then treats
    /// it as a regular command
    fn execute_acmd(&mut self, index: u8, argument: u32) -> Option<Reply> {
        use CardState::*;
        let reply = match (index, self.state) {
            (acmd::SET_BUS_WIDTH, Tran) => match argument & 3 {
                0 => {
                    self.bus_width = 1;
                    self.r1(true)
                }
                2 if self.supports_4bit => {
                    self.bus_width = 4;
                    self.r1(true)
                }
                _ => Reply::Timeout,
            },
            (acmd::SD_STATUS, Tran) => {
                let reply = self.r1(true);
                let mut status = vec![0u8; 64];
                status[0] = if self.bus_width == 4 { 0x80 } else { 0 };
                self.start(Stream::Register(status));
                reply
            }
            (acmd::SD_SEND_OP_COND, Idle | Ready) => self.op_cond(argument, false),
            (acmd::SET_CLR_CARD_DETECT, Tran) => self.r1(true),
            (acmd::SEND_SCR, Tran) => {
                let reply = self.r1(true);
                let scr = self.scr();
                self.start(Stream::Register(scr));
                reply
            }
            (
                acmd::SET_BUS_WIDTH
                | acmd::SD_STATUS
                | acmd::SD_SEND_OP_COND
                | acmd::SET_CLR_CARD_DETECT
                | acmd::SEND_SCR,
                _,
            ) => Reply::Timeout,
            _ => return None,
        };
        Some(reply)
    }

    fn go_idle(&mut self) {
        self.state = CardState::Idle;
        self.rca = 0;
        self.stream = None;
        self.block_count = None;
        self.bus_width = 1;
        self.high_speed_timing = false;
        self.pending = CardStatus::empty();
    }

    /// ACMD41 / CMD1
    fn op_cond(&mut self, argument: u32, mmc: bool) -> Reply {
        let host_window = argument & ocr::VDD_WINDOW_MASK;
        if host_window == 0 || host_window & self.vdd_window == 0 {
            // Inquiry, or no common voltage: report the window and stay busy
            return Reply::Short(self.ocr(false, false));
        }

        let high_capacity = match self.preset {
            Preset::Sdhc | Preset::Sduc => {
                if argument & ocr::HCS == 0 {
                    // A high capacity card never leaves busy for a host without HCS
                    return Reply::Short(self.ocr(false, false));
                }
                true
            }
            Preset::Emmc => true,
            _ => false,
        };

        if self.never_ready || self.busy_polls > 0 {
            self.busy_polls = self.busy_polls.saturating_sub(1);
            return Reply::Short(self.ocr(false, false));
        }

        self.state = CardState::Ready;
        let value = self.ocr(true, high_capacity);
        trace!("SimCard {} ready, OCR {:#010X}", if mmc { "MMC" } else { "SD" }, value);
        Reply::Short(value)
    }

    /// MMC SWITCH, write byte access only
    fn mmc_switch(&mut self, argument: u32) {
        let access = (argument >> 24) & 3;
        let index = (argument >> 16) as u8;
        let value = (argument >> 8) as u8;

        let accepted = access == arg::MMC_SWITCH_WRITE_BYTE
            && match (index, value) {
                (ext_csd::HS_TIMING, 0) => {
                    self.high_speed_timing = false;
                    true
                }
                (ext_csd::HS_TIMING, ext_csd::HS_TIMING_HS) if self.supports_high_speed => {
                    self.high_speed_timing = true;
                    true
                }
                (ext_csd::BUS_WIDTH, 0) => {
                    self.bus_width = 1;
                    true
                }
                (ext_csd::BUS_WIDTH, ext_csd::BUS_WIDTH_4) if self.supports_4bit => {
                    self.bus_width = 4;
                    true
                }
                _ => false,
            };
        if !accepted {
            debug!("SimCard: SWITCH {:#X} rejected", argument);
            self.pending |= CardStatus::SWITCH_ERROR;
        }
    }

    fn start(&mut self, stream: Stream) {
        self.state = match stream {
            Stream::Write { .. } => CardState::Rcv,
            _ => CardState::Data,
        };
        self.stream = Some(stream);
    }

    /// READ/WRITE_(SINGLE|MULTIPLE)_BLOCK
    fn begin_data(&mut self, argument: u32, single: bool, write: bool) -> Reply {
        let sector = if self.preset.byte_addressed() {
            if argument % SECTOR_SIZE as u32 != 0 {
                self.pending |= CardStatus::ADDRESS_ERROR;
                return self.r1(false);
            }
            (argument / SECTOR_SIZE as u32) as u64
        } else {
            argument as u64
        };

        let remaining = if single {
            Some(1)
        } else {
            self.block_count.take()
        };

        if sector >= self.sectors {
            self.pending |= CardStatus::OUT_OF_RANGE | CardStatus::ADDRESS_ERROR;
            return self.r1(false);
        }
        if write && (self.perm_write_protect || self.tmp_write_protect) {
            self.pending |= CardStatus::WP_VIOLATION;
            return self.r1(false);
        }

        let reply = self.r1(false);
        self.start(if write {
            Stream::Write {
                next: sector,
                remaining,
            }
        } else {
            Stream::Read {
                next: sector,
                remaining,
            }
        });
        reply
    }

    // ========================================================================
    // Data blocks
    // ========================================================================

    /// Send the next data block to the host
    pub fn read_block(&mut self, len: usize) -> Result<Vec<u8>, DataFault> {
        match self.stream.take() {
            Some(Stream::Register(mut bytes)) => {
                self.state = CardState::Tran;
                bytes.resize(len, 0);
                Ok(bytes)
            }
            Some(Stream::Read { next, remaining }) => {
                if next >= self.sectors {
                    self.pending |= CardStatus::OUT_OF_RANGE;
                    self.stream = Some(Stream::Read { next, remaining });
                    return Err(DataFault::Timeout);
                }

                let mut data = vec![0u8; len];
                if let Err(e) = self.storage.read(next, &mut data) {
                    warn!("Failed to read sector {}: {}", next, e);
                }
                if self.ecc_errors.as_ref().is_some_and(|r| r.contains(&next)) {
                    self.pending |= CardStatus::CARD_ECC_FAILED;
                }

                let remaining = remaining.map(|n| n.saturating_sub(1));
                if remaining == Some(0) {
                    self.state = CardState::Tran;
                } else {
                    self.stream = Some(Stream::Read {
                        next: next + 1,
                        remaining,
                    });
                }

                if self.crc_failures > 0 {
                    self.crc_failures -= 1;
                    return Err(DataFault::Crc);
                }
                Ok(data)
            }
            other => {
                self.stream = other;
                Err(DataFault::Timeout)
            }
        }
    }

    /// Accept a data block from the host
    pub fn write_block(&mut self, data: &[u8]) -> Result<(), DataFault> {
        match self.stream.take() {
            Some(Stream::Write { next, remaining }) => {
                if next >= self.sectors {
                    self.pending |= CardStatus::OUT_OF_RANGE;
                    self.stream = Some(Stream::Write { next, remaining });
                    return Err(DataFault::Timeout);
                }

                if let Err(e) = self.storage.write(next, data) {
                    warn!("Failed to write sector {}: {}", next, e);
                    self.pending |= CardStatus::ERROR;
                }

                let remaining = remaining.map(|n| n.saturating_sub(1));
                if remaining == Some(0) {
                    self.state = CardState::Prg;
                } else {
                    self.stream = Some(Stream::Write {
                        next: next + 1,
                        remaining,
                    });
                }
                Ok(())
            }
            other => {
                self.stream = other;
                Err(DataFault::Timeout)
            }
        }
    }
}

fn put(reg: &mut u128, start: u32, len: u32, value: u128) {
    let mask = ((1u128 << len) - 1) << start;
    *reg = (*reg & !mask) | ((value << start) & mask);
}

/// Version 1 CSD encoding (C_SIZE, C_SIZE_MULT, READ_BL_LEN) closest to `sectors`.
/// Returns the encoding and the capacity it expresses.
fn v1_geometry(sectors: u64) -> (u32, u32, u32, u64) {
    for bl_len in 9..=11u32 {
        for mult in 0..=7u32 {
            let unit = 1u64 << (mult + 2 + bl_len - 9);
            if sectors % unit == 0 && (1..=4096).contains(&(sectors / unit)) {
                return ((sectors / unit - 1) as u32, mult, bl_len, sectors);
            }
        }
    }
    let unit = 1u64 << (7 + 2 + 2);
    let steps = (sectors / unit).clamp(1, 4096);
    ((steps - 1) as u32, 7, 11, steps * unit)
}
