//! SD and (e)MMC bus protocol constants.
//!
//! # References
//! - SD Specifications Part 1, Physical Layer Simplified Specification
//! - JEDEC JESD84-B51, Embedded Multi-Media Card (e•MMC) Electrical Standard

/// Command indices shared by SD and MMC
pub mod cmd {
    pub const GO_IDLE_STATE: u8 = 0;
    /// MMC only
    pub const SEND_OP_COND: u8 = 1;
    pub const ALL_SEND_CID: u8 = 2;
    /// SD: SEND_RELATIVE_ADDR (card picks), MMC: SET_RELATIVE_ADDR (host assigns)
    pub const SET_RELATIVE_ADDR: u8 = 3;
    /// SD: SWITCH_FUNC (R1 + 64 byte status), MMC: SWITCH (R1b)
    pub const SWITCH: u8 = 6;
    pub const SELECT_CARD: u8 = 7;
    /// SD: SEND_IF_COND (R7), MMC: SEND_EXT_CSD (R1 + 512 byte block)
    pub const SEND_IF_COND: u8 = 8;
    pub const SEND_EXT_CSD: u8 = 8;
    pub const SEND_CSD: u8 = 9;
    pub const SEND_CID: u8 = 10;
    pub const STOP_TRANSMISSION: u8 = 12;
    pub const SEND_STATUS: u8 = 13;
    pub const SET_BLOCKLEN: u8 = 16;
    pub const READ_SINGLE_BLOCK: u8 = 17;
    pub const READ_MULTIPLE_BLOCK: u8 = 18;
    pub const SET_BLOCK_COUNT: u8 = 23;
    pub const WRITE_BLOCK: u8 = 24;
    pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
    pub const APP_CMD: u8 = 55;
}

/// SD application specific commands (sent after APP_CMD)
pub mod acmd {
    pub const SET_BUS_WIDTH: u8 = 6;
    pub const SD_STATUS: u8 = 13;
    pub const SD_SEND_OP_COND: u8 = 41;
    pub const SET_CLR_CARD_DETECT: u8 = 42;
    pub const SEND_SCR: u8 = 51;
}

/// Command arguments
pub mod arg {
    /// SEND_IF_COND: 2.7-3.6 V supply and check pattern 0xAA
    pub const IF_COND: u32 = 0x1aa;
    /// SEND_IF_COND check pattern
    pub const IF_COND_CHECK_PATTERN: u32 = 0xaa;
    /// SEND_IF_COND supply voltage field (bits 11:8)
    pub const IF_COND_VHS_MASK: u32 = 0xf00;
    /// SWITCH_FUNC mode 1, group 1 = high speed, other groups unchanged
    pub const SWITCH_FUNC_HS: u32 = 0x80ff_fff1;
    /// ACMD6 argument for a 4-bit bus
    pub const SD_BUS_WIDTH_4: u32 = 2;
    /// ACMD42 argument disconnecting the DAT3 card detect pull-up
    pub const CARD_DETECT_PULLUP_OFF: u32 = 0;
    /// MMC SWITCH access mode: write byte
    pub const MMC_SWITCH_WRITE_BYTE: u32 = 3;

    /// Build an MMC SWITCH argument
    pub const fn mmc_switch(access: u32, index: u8, value: u8) -> u32 {
        (access << 24) | ((index as u32) << 16) | ((value as u32) << 8)
    }

    /// Argument of RCA-addressed commands
    pub const fn rca(rca: u16) -> u32 {
        (rca as u32) << 16
    }
}

/// Operation Conditions Register bits
pub mod ocr {
    /// 3.2-3.3 V window
    pub const VDD_32_33: u32 = 1 << 20;
    /// 3.3-3.4 V window
    pub const VDD_33_34: u32 = 1 << 21;
    /// Full voltage window bits 23:8
    pub const VDD_WINDOW_MASK: u32 = 0x00ff_ff00;
    /// Voltages the host supplies
    pub const HOST_VDD: u32 = VDD_32_33 | VDD_33_34;
    /// SD: switch to 1.8 V request (S18R)
    pub const S18R: u32 = 1 << 24;
    /// SD: maximum performance (XPC)
    pub const XPC: u32 = 1 << 28;
    /// SD: host capacity support (HCS) in ACMD41, card capacity status (CCS) in the OCR
    pub const HCS: u32 = 1 << 30;
    pub const CCS: u32 = 1 << 30;
    /// MMC: sector access mode
    pub const MMC_SECTOR_MODE: u32 = 1 << 30;
    /// Power-up routine finished (not busy)
    pub const READY: u32 = 1 << 31;
}

/// CSD bit positions (bit numbers of the 128-bit register)
pub mod csd {
    pub const STRUCTURE: u32 = 126;
    pub const MMC_SPEC_VERS: u32 = 122;
    pub const TRAN_SPEED: u32 = 96;
    pub const CCC: u32 = 84;
    pub const READ_BL_LEN: u32 = 80;
    pub const V1_C_SIZE: u32 = 62;
    pub const V1_C_SIZE_MULT: u32 = 47;
    pub const V2_C_SIZE: u32 = 48;
    pub const V3_C_SIZE: u32 = 48;
    pub const PERM_WRITE_PROTECT: u32 = 13;
    pub const TMP_WRITE_PROTECT: u32 = 12;

    /// MMC C_SIZE value meaning "capacity is in EXT_CSD SEC_COUNT"
    pub const MMC_C_SIZE_EXTENDED: u32 = 0xfff;

    /// Command class 10 (switch function)
    pub const CCC_SWITCH: u16 = 1 << 10;
}

/// EXT_CSD byte offsets and values
pub mod ext_csd {
    pub const SIZE: usize = 512;
    pub const BUS_WIDTH: u8 = 183;
    pub const HS_TIMING: u8 = 185;
    pub const CARD_TYPE: usize = 196;
    pub const SEC_COUNT: usize = 212;

    /// CARD_TYPE: high speed at 26 MHz
    pub const CARD_TYPE_HS_26: u8 = 1 << 0;
    /// CARD_TYPE: high speed at 52 MHz
    pub const CARD_TYPE_HS_52: u8 = 1 << 1;

    /// BUS_WIDTH value for a 4-bit bus
    pub const BUS_WIDTH_4: u8 = 1;
    /// HS_TIMING value selecting high speed
    pub const HS_TIMING_HS: u8 = 1;
}

/// SD Configuration Register (8 bytes, big endian)
pub mod scr {
    pub const SIZE: usize = 8;
    /// SD_BUS_WIDTHS bit for 4-bit support (byte 1)
    pub const BUS_WIDTH_4: u8 = 1 << 2;
    /// CMD_SUPPORT bit for SET_BLOCK_COUNT (byte 3)
    pub const CMD23_SUPPORT: u8 = 1 << 1;
}

/// SWITCH_FUNC status block (64 bytes, big endian)
pub mod switch_status {
    pub const SIZE: usize = 64;
    /// Byte holding function group 1's selection in its low nibble (bits 379:376)
    pub const GROUP1_SELECTED_BYTE: usize = 16;
    /// Function number of high speed in group 1
    pub const FUNC_HIGH_SPEED: u8 = 1;
}

/// Size of every sector transferred by this driver
pub const SECTOR_SIZE: usize = 512;
