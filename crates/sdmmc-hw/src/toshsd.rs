//! Toshiba TMIO-style SD/MMC host controller ("TOSHSD") as found on the 3DS.
//!
//! # References
//! - <https://www.3dbrew.org/wiki/EMMC_Registers>
//! - <https://dsibrew.org/wiki/SD/MMC/SDIO_Registers>

/// SDMMC1 MMIO region base address (SD card slot and eMMC)
pub const BASE: u32 = 0x10006000;

/// SDMMC1 MMIO region end address (exclusive)
pub const END: u32 = 0x10007000;

/// Number of ports behind one controller (0 = SD card slot, 1 = eMMC)
pub const NUM_PORTS: usize = 2;

/// Register offsets (relative to `BASE`)
pub mod registers {
    /// Command register. Writing it dispatches the command on the wire.
    pub const CMD: u32 = 0x000;

    /// Port selection register (0 = SD card, 1 = eMMC)
    pub const PORTSEL: u32 = 0x002;

    /// Command argument register (lower 16 bits)
    pub const CMDARG0: u32 = 0x004;

    /// Command argument register (upper 16 bits)
    pub const CMDARG1: u32 = 0x006;

    /// Stop/abort control register
    pub const STOP: u32 = 0x008;

    /// Block count register (16-bit FIFO mode)
    pub const BLKCOUNT: u32 = 0x00a;

    /// Response registers (8 × 16 bits, response bits 8..135)
    pub const RESP0: u32 = 0x00c;
    pub const RESP1: u32 = 0x00e;
    pub const RESP2: u32 = 0x010;
    pub const RESP3: u32 = 0x012;
    pub const RESP4: u32 = 0x014;
    pub const RESP5: u32 = 0x016;
    pub const RESP6: u32 = 0x018;
    pub const RESP7: u32 = 0x01a;

    /// Status register 0 (completion and card detection flags)
    pub const STATUS0: u32 = 0x01c;

    /// Status register 1 (error and FIFO flags)
    pub const STATUS1: u32 = 0x01e;

    /// Interrupt mask registers
    pub const IRQ_MASK0: u32 = 0x020;
    pub const IRQ_MASK1: u32 = 0x022;

    /// Card clock control register
    pub const CLKCTL: u32 = 0x024;

    /// Block length register (16-bit FIFO mode)
    pub const BLKLEN: u32 = 0x026;

    /// Option register (bus width, timeouts)
    pub const OPT: u32 = 0x028;

    /// Detailed error status registers
    pub const ERROR_DETAIL_STATUS0: u32 = 0x02c;
    pub const ERROR_DETAIL_STATUS1: u32 = 0x02e;

    /// 16-bit data FIFO
    pub const FIFO: u32 = 0x030;

    /// Data control register (selects the 32-bit FIFO)
    pub const DATA_CTL: u32 = 0x0d8;

    /// Software reset register
    pub const RESET: u32 = 0x0e0;

    /// 32-bit FIFO control register
    pub const DATA32_CTL: u32 = 0x100;

    /// 32-bit FIFO block length
    pub const DATA32_BLK_LEN: u32 = 0x104;

    /// 32-bit FIFO block count
    pub const DATA32_BLK_COUNT: u32 = 0x108;

    /// 32-bit data FIFO
    pub const DATA32_FIFO: u32 = 0x10c;
}

/// Bit fields of the command register
pub mod cmd {
    /// Command index mask
    pub const INDEX_MASK: u16 = 0x003f;
    /// Application specific command (previous command was APP_CMD)
    pub const APP: u16 = 1 << 6;
    /// Response type mask
    pub const RESP_MASK: u16 = 7 << 8;
    /// No response
    pub const RESP_NONE: u16 = 3 << 8;
    /// R1, R5, R6 and R7 responses (48-bit)
    pub const RESP_R1: u16 = 4 << 8;
    /// R1b response (48-bit with busy)
    pub const RESP_R1B: u16 = 5 << 8;
    /// R2 response (136-bit)
    pub const RESP_R2: u16 = 6 << 8;
    /// R3 and R4 responses (48-bit without CRC)
    pub const RESP_R3: u16 = 7 << 8;
    /// Command has a data phase
    pub const DATA_EN: u16 = 1 << 11;
    /// Data direction is card to host
    pub const DATA_READ: u16 = 1 << 12;
    /// Multi-block data transfer
    pub const MULTI_BLOCK: u16 = 1 << 13;
}

/// Bit fields of the stop register
pub mod stop {
    /// Issue STOP_TRANSMISSION internally / abort the data phase
    pub const STOP: u16 = 1 << 0;
    /// Automatically send CMD12 after a multi-block transfer
    pub const AUTO_STOP: u16 = 1 << 8;
}

/// Bit fields of STATUS0
pub mod status0 {
    /// Command response received
    pub const CMD_RESP_END: u16 = 1 << 0;
    /// Data transfer finished
    pub const DATA_END: u16 = 1 << 2;
    /// Card was removed (sticky)
    pub const CARD_REMOVED: u16 = 1 << 3;
    /// Card was inserted (sticky)
    pub const CARD_INSERTED: u16 = 1 << 4;
    /// Card is currently present
    pub const CARD_PRESENT: u16 = 1 << 5;
    /// Write protect slider state. Set means writable.
    pub const WRITE_ENABLED: u16 = 1 << 7;
}

/// Bit fields of STATUS1
pub mod status1 {
    /// Command index error
    pub const ERR_CMD_INDEX: u16 = 1 << 0;
    /// CRC error on response or data
    pub const ERR_CRC: u16 = 1 << 1;
    /// Stop bit (end bit) error
    pub const ERR_STOP_BIT: u16 = 1 << 2;
    /// Data timeout
    pub const ERR_DATA_TIMEOUT: u16 = 1 << 3;
    /// Receive FIFO overflow
    pub const ERR_RX_OVERFLOW: u16 = 1 << 4;
    /// Transmit FIFO underrun
    pub const ERR_TX_UNDERRUN: u16 = 1 << 5;
    /// Command response timeout
    pub const ERR_CMD_TIMEOUT: u16 = 1 << 6;
    /// 16-bit FIFO has data to read
    pub const RXRDY: u16 = 1 << 8;
    /// 16-bit FIFO wants data
    pub const TXRQ: u16 = 1 << 9;
    /// Command line busy
    pub const CMD_BUSY: u16 = 1 << 14;
    /// Illegal register access
    pub const ERR_ILLEGAL_ACCESS: u16 = 1 << 15;

    /// All error flags
    pub const ERR_MASK: u16 = ERR_CMD_INDEX
        | ERR_CRC
        | ERR_STOP_BIT
        | ERR_DATA_TIMEOUT
        | ERR_RX_OVERFLOW
        | ERR_TX_UNDERRUN
        | ERR_CMD_TIMEOUT
        | ERR_ILLEGAL_ACCESS;
}

/// Bit fields of the clock control register
pub mod clkctl {
    /// Divider select mask. 0 = HCLK/2, 1 << n = HCLK/(4 << n).
    pub const DIV_MASK: u16 = 0x00ff;
    /// Card clock enable
    pub const CLK_EN: u16 = 1 << 8;
}

/// Bit fields of the option register
pub mod opt {
    /// Default card detect and data timeout settings
    pub const TIMEOUTS_DEFAULT: u16 = 0x40ee;
    /// 1-bit data bus when set, 4-bit when clear
    pub const BUS_WIDTH_1BIT: u16 = 1 << 15;
}

/// Bit fields of the data control register
pub mod data_ctl {
    /// Route data through the 32-bit FIFO
    pub const DATA32_MODE: u16 = 1 << 1;
}

/// Bit fields of the software reset register
pub mod reset {
    /// Controller runs when set, held in reset when clear
    pub const RELEASE: u16 = 1 << 0;
}

/// Bit fields of the 32-bit FIFO control register
pub mod data32_ctl {
    /// Enable the 32-bit FIFO
    pub const MODE32: u16 = 1 << 1;
    /// A full block is waiting in the receive FIFO
    pub const RX32_READY: u16 = 1 << 8;
    /// Transmit FIFO is full. Clear means the next block can be written.
    pub const TX32_FULL: u16 = 1 << 9;
    /// Clear the FIFO
    pub const FIFO_CLEAR: u16 = 1 << 10;
    /// Raise a DMA request when a block is ready to be read
    pub const RX32_READY_IRQ: u16 = 1 << 11;
    /// Raise a DMA request when the FIFO wants a block
    pub const TX32_REQ_IRQ: u16 = 1 << 12;
}
