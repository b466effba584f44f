use sdmmc_hw::specs::timing;

/// Driver tuning knobs
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Times a read is repeated after a CRC error
    pub read_retries: u32,
    /// SEND_OP_COND polls before giving up
    pub op_cond_tries: u32,
    /// Delay between SEND_OP_COND polls in milliseconds
    pub op_cond_poll_ms: u32,
    /// Switch cards to high speed timing when they support it
    pub high_speed: bool,
    /// Switch cards to a 4-bit bus when they support it
    pub wide_bus: bool,
    /// Use SET_BLOCK_COUNT instead of STOP_TRANSMISSION for SD multi-block transfers
    pub set_block_count: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            op_cond_tries: timing::OP_COND_BUDGET_MS / timing::OP_COND_POLL_MS,
            op_cond_poll_ms: timing::OP_COND_POLL_MS,
            high_speed: true,
            wide_bus: true,
            set_block_count: true,
        }
    }
}
