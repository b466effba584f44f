/// Card bus clock specifications
pub mod clock {
    /// Controller input clock on the 3DS (67.027964 MHz)
    pub const HCLK_HZ: u32 = 67_027_964;

    /// Identification mode clock (maximum 400 kHz)
    pub const INIT_HZ: u32 = 400_000;

    /// SD default speed clock (maximum 25 MHz)
    pub const SD_DEFAULT_HZ: u32 = 25_000_000;

    /// SD high speed clock (maximum 50 MHz)
    pub const SD_HIGH_SPEED_HZ: u32 = 50_000_000;

    /// Legacy MMC clock (maximum 20 MHz)
    pub const MMC_DEFAULT_HZ: u32 = 20_000_000;

    /// MMC high speed clock, 26 MHz capable cards
    pub const MMC_HS_26_HZ: u32 = 26_000_000;

    /// MMC high speed clock, 52 MHz capable cards
    pub const MMC_HS_52_HZ: u32 = 52_000_000;

    /// Clock cycles the card needs after power-up before the first command
    pub const POWER_UP_CYCLES: u32 = 74;
}

/// Timing budgets
pub mod timing {
    /// SEND_OP_COND polling budget
    pub const OP_COND_BUDGET_MS: u32 = 1000;

    /// Delay between SEND_OP_COND polls
    pub const OP_COND_POLL_MS: u32 = 5;

    /// Per command response budget
    pub const CMD_RESPONSE_MS: u32 = 100;

    /// Budget for each data block, and for the busy phase after the last one
    /// (SD write timeout, the longest of the data timeouts)
    pub const DATA_BLOCK_MS: u32 = 250;
}
