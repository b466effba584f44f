//! Card registers and status words.

use bitflags::bitflags;
use sdmmc_hw::protocol::{csd, ext_csd, ocr, scr, switch_status};

/// Card variant detected during initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CardKind {
    /// No card / slot not initialized
    #[default]
    None = 0,
    /// Byte addressed (e)MMC
    Mmc = 1,
    /// Sector addressed (e)MMC
    MmcHc = 2,
    /// SD standard capacity
    Sdsc = 3,
    /// SDHC or SDXC
    Sdhc = 4,
    /// SD ultra capacity
    Sduc = 5,
}

impl CardKind {
    pub fn is_sd(self) -> bool {
        matches!(self, CardKind::Sdsc | CardKind::Sdhc | CardKind::Sduc)
    }

    pub fn is_mmc(self) -> bool {
        matches!(self, CardKind::Mmc | CardKind::MmcHc)
    }

    /// Legacy cards take byte addresses instead of sector numbers
    pub fn byte_addressed(self) -> bool {
        matches!(self, CardKind::Mmc | CardKind::Sdsc)
    }
}

/// Card state as reported in bits 12:9 of the card status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CardState {
    Idle = 0,
    Ready = 1,
    Ident = 2,
    Stby = 3,
    Tran = 4,
    Data = 5,
    Rcv = 6,
    Prg = 7,
    Dis = 8,
    Reserved = 15,
}

impl CardState {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0xf {
            0 => CardState::Idle,
            1 => CardState::Ready,
            2 => CardState::Ident,
            3 => CardState::Stby,
            4 => CardState::Tran,
            5 => CardState::Data,
            6 => CardState::Rcv,
            7 => CardState::Prg,
            8 => CardState::Dis,
            _ => CardState::Reserved,
        }
    }
}

bitflags! {
    /// Card status word (R1 response, SEND_STATUS)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u32 {
        const OUT_OF_RANGE = 1 << 31;
        const ADDRESS_ERROR = 1 << 30;
        const BLOCK_LEN_ERROR = 1 << 29;
        const ERASE_SEQ_ERROR = 1 << 28;
        const ERASE_PARAM = 1 << 27;
        const WP_VIOLATION = 1 << 26;
        const CARD_IS_LOCKED = 1 << 25;
        const LOCK_UNLOCK_FAILED = 1 << 24;
        const COM_CRC_ERROR = 1 << 23;
        const ILLEGAL_COMMAND = 1 << 22;
        const CARD_ECC_FAILED = 1 << 21;
        const CC_ERROR = 1 << 20;
        const ERROR = 1 << 19;
        const CURRENT_STATE = 0xf << 9;
        const READY_FOR_DATA = 1 << 8;
        /// MMC only
        const SWITCH_ERROR = 1 << 7;
        const APP_CMD = 1 << 5;

        /// Flags that fail a sector transfer
        const TRANSFER_ERRORS = Self::ADDRESS_ERROR.bits()
            | Self::BLOCK_LEN_ERROR.bits()
            | Self::WP_VIOLATION.bits()
            | Self::COM_CRC_ERROR.bits()
            | Self::ILLEGAL_COMMAND.bits()
            | Self::CARD_ECC_FAILED.bits()
            | Self::CC_ERROR.bits()
            | Self::ERROR.bits();
    }
}

impl CardStatus {
    pub fn state(self) -> CardState {
        CardState::from_bits(self.bits() >> 9)
    }

    pub fn with_state(self, state: CardState) -> Self {
        Self::from_bits_retain((self.bits() & !Self::CURRENT_STATE.bits()) | ((state as u32) << 9))
    }

    pub fn transfer_errors(self) -> Self {
        self & Self::TRANSFER_ERRORS
    }
}

bitflags! {
    /// Write protection bits. Each set bit means protected.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct WriteProtect: u8 {
        /// SD card write protection slider
        const SLIDER = 1 << 0;
        /// Temporary write protection (CSD)
        const TEMP = 1 << 1;
        /// Permanent write protection (CSD)
        const PERM = 1 << 2;
    }
}

/// Extract `len` bits starting at register bit `start` of an R2 response.
///
/// R2 words carry register bits 8..127, the CRC byte is already gone.
fn r2_bits(words: &[u32; 4], start: u32, len: u32) -> u32 {
    let raw = (words[0] as u128)
        | ((words[1] as u128) << 32)
        | ((words[2] as u128) << 64)
        | ((words[3] as u128) << 96);
    ((raw >> (start - 8)) & ((1u128 << len) - 1)) as u32
}

/// Operation Conditions Register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ocr(pub u32);

impl Ocr {
    /// Power-up finished
    pub fn ready(self) -> bool {
        self.0 & ocr::READY != 0
    }

    /// SD: card capacity status. MMC: sector access mode.
    pub fn high_capacity(self) -> bool {
        self.0 & ocr::CCS != 0
    }

    pub fn supports(self, vdd_mask: u32) -> bool {
        self.0 & vdd_mask & ocr::VDD_WINDOW_MASK != 0
    }
}

/// Card-Specific Data register
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Csd {
    pub structure: u8,
    /// MMC system specification version
    pub spec_vers: u8,
    pub ccc: u16,
    pub read_bl_len: u8,
    pub c_size: u32,
    pub c_size_mult: u8,
    pub tmp_write_protect: bool,
    pub perm_write_protect: bool,
}

impl Csd {
    pub fn parse(words: &[u32; 4], sd: bool) -> Self {
        let structure = r2_bits(words, csd::STRUCTURE, 2) as u8;
        let c_size = match (sd, structure) {
            (true, 1) => r2_bits(words, csd::V2_C_SIZE, 22),
            (true, 2) => r2_bits(words, csd::V3_C_SIZE, 28),
            _ => r2_bits(words, csd::V1_C_SIZE, 12),
        };

        Self {
            structure,
            spec_vers: if sd {
                0
            } else {
                r2_bits(words, csd::MMC_SPEC_VERS, 4) as u8
            },
            ccc: r2_bits(words, csd::CCC, 12) as u16,
            read_bl_len: r2_bits(words, csd::READ_BL_LEN, 4) as u8,
            c_size,
            c_size_mult: r2_bits(words, csd::V1_C_SIZE_MULT, 3) as u8,
            tmp_write_protect: r2_bits(words, csd::TMP_WRITE_PROTECT, 1) != 0,
            perm_write_protect: r2_bits(words, csd::PERM_WRITE_PROTECT, 1) != 0,
        }
    }

    pub fn write_protect(&self) -> WriteProtect {
        let mut wp = WriteProtect::empty();
        wp.set(WriteProtect::TEMP, self.tmp_write_protect);
        wp.set(WriteProtect::PERM, self.perm_write_protect);
        wp
    }

    fn v1_sectors(&self) -> u64 {
        let bytes = ((self.c_size as u64) + 1)
            << (self.c_size_mult as u64 + 2)
            << self.read_bl_len as u64;
        bytes / 512
    }

    /// Capacity of an SD card in 512-byte sectors
    pub fn sd_sectors(&self) -> u64 {
        match self.structure {
            0 => self.v1_sectors(),
            _ => (self.c_size as u64 + 1) * 1024,
        }
    }

    /// Capacity of an MMC in 512-byte sectors, `None` when it must come from EXT_CSD.
    ///
    /// C_SIZE 0xFFF only means "see SEC_COUNT" on cards that have an EXT_CSD.
    pub fn mmc_sectors(&self) -> Option<u64> {
        if self.c_size == csd::MMC_C_SIZE_EXTENDED && self.mmc_has_ext_csd() {
            None
        } else {
            Some(self.v1_sectors())
        }
    }

    /// SWITCH and EXT_CSD exist from MMC system specification 4.0 on
    pub fn mmc_has_ext_csd(&self) -> bool {
        self.spec_vers >= 4
    }
}

/// eMMC extended CSD, the fields this driver consumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtCsd {
    pub sec_count: u32,
    pub card_type: u8,
}

impl ExtCsd {
    pub fn parse(raw: &[u8; ext_csd::SIZE]) -> Self {
        let s = ext_csd::SEC_COUNT;
        Self {
            sec_count: u32::from_le_bytes([raw[s], raw[s + 1], raw[s + 2], raw[s + 3]]),
            card_type: raw[ext_csd::CARD_TYPE],
        }
    }

    /// Highest high speed clock the card advertises
    pub fn hs_clock_hz(&self) -> Option<u32> {
        use sdmmc_hw::specs::clock;
        if self.card_type & ext_csd::CARD_TYPE_HS_52 != 0 {
            Some(clock::MMC_HS_52_HZ)
        } else if self.card_type & ext_csd::CARD_TYPE_HS_26 != 0 {
            Some(clock::MMC_HS_26_HZ)
        } else {
            None
        }
    }
}

/// SD Configuration Register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scr {
    pub sd_spec: u8,
    pub bus_widths: u8,
    pub cmd_support: u8,
}

impl Scr {
    pub fn parse(raw: &[u8; scr::SIZE]) -> Self {
        Self {
            sd_spec: raw[0] & 0xf,
            bus_widths: raw[1] & 0xf,
            cmd_support: raw[3] & 0x1f,
        }
    }

    pub fn supports_4bit(&self) -> bool {
        self.bus_widths & scr::BUS_WIDTH_4 != 0
    }

    pub fn supports_cmd23(&self) -> bool {
        self.cmd_support & scr::CMD23_SUPPORT != 0
    }
}

impl Default for Scr {
    /// What every SD memory card supports
    fn default() -> Self {
        Self {
            sd_spec: 0,
            bus_widths: 0x1 | scr::BUS_WIDTH_4,
            cmd_support: 0,
        }
    }
}

/// Function selected in group 1 (access mode) of a SWITCH_FUNC status block
pub fn switch_group1_selected(raw: &[u8; switch_status::SIZE]) -> u8 {
    raw[switch_status::GROUP1_SELECTED_BYTE] & 0xf
}

/// Data arrives through the FIFO as little endian words
pub(crate) fn words_to_bytes(words: &[u32], out: &mut [u8]) {
    for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}
