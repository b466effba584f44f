//! Helpers shared by the simulator scenario tests.
//!
//! Every test drives the real driver and register-level controller against
//! [`SdmmcState`], so a scenario exercises the whole stack from the API down
//! to the simulated card.

use sdmmc::sim::{self, IssuedCommand, SdmmcState, SimCard, SimHost};
use sdmmc::{DriverConfig, Sdmmc};
use sdmmc_hw::specs::clock::HCLK_HZ;

pub use sdmmc::sim::Preset;

/// Device numbers of the API
pub const CARD: u8 = 0;
pub const EMMC: u8 = 1;

/// Words in one sector
pub const WORDS: usize = 128;

/// 32 GiB SDHC as sold (60873 * 1024 sectors)
pub const SDHC_32G_SECTORS: u64 = 62_333_952;

/// 4 GiB eMMC as fitted to the console
pub const EMMC_4G_SECTORS: u64 = 7_634_944;

/// Clock after the default speed switch: HCLK / 4
pub const DEFAULT_SPEED_HZ: u32 = HCLK_HZ / 4;

/// Clock after the high speed switch: HCLK / 2
pub const HIGH_SPEED_HZ: u32 = HCLK_HZ / 2;

/// Route driver logs to the test output (RUST_LOG=sdmmc=trace)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Driver with both ports empty
pub fn empty() -> Sdmmc<SimHost> {
    init_logging();
    sim::driver(SdmmcState::new())
}

/// Driver with `card` in the card slot
pub fn with_card(card: SimCard) -> Sdmmc<SimHost> {
    init_logging();
    sim::driver(SdmmcState::new().with_card(card))
}

/// Driver with `card` soldered to the eMMC port
pub fn with_emmc(card: SimCard) -> Sdmmc<SimHost> {
    init_logging();
    sim::driver(SdmmcState::new().with_emmc(card))
}

pub fn with_config(state: SdmmcState, config: DriverConfig) -> Sdmmc<SimHost> {
    init_logging();
    sim::driver_with_config(state, config)
}

/// Initialized driver with `card` in the card slot
pub fn ready_card(card: SimCard) -> Sdmmc<SimHost> {
    let mut sd = with_card(card);
    assert_eq!(sd.init(CARD), Ok(()));
    sd
}

/// Initialized driver with `card` on the eMMC port
pub fn ready_emmc(card: SimCard) -> Sdmmc<SimHost> {
    let mut sd = with_emmc(card);
    assert_eq!(sd.init(EMMC), Ok(()));
    sd
}

/// Deterministic, sector-unique contents for `count` sectors starting at `first`
pub fn pattern(first: u32, count: usize) -> Vec<u32> {
    (0..count * WORDS)
        .map(|i| {
            let sector = first as u64 + (i / WORDS) as u64;
            (sector as u32).rotate_left(16) ^ (i % WORDS) as u32 ^ 0x5aa5_0000
        })
        .collect()
}

/// Words as the card stores them
pub fn to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn state(sd: &Sdmmc<SimHost>) -> &SdmmcState {
    sd.controller().bus()
}

pub fn state_mut(sd: &mut Sdmmc<SimHost>) -> &mut SdmmcState {
    sd.controller_mut().bus_mut()
}

/// Commands dispatched since the last [`clear_history`]
pub fn history(sd: &Sdmmc<SimHost>) -> Vec<IssuedCommand> {
    state(sd).history().to_vec()
}

pub fn clear_history(sd: &mut Sdmmc<SimHost>) {
    state_mut(sd).clear_history();
}

/// Regular (non-application) commands with this index
pub fn count_cmd(sd: &Sdmmc<SimHost>, index: u8) -> usize {
    state(sd)
        .history()
        .iter()
        .filter(|c| c.index == index && !c.app)
        .count()
}

/// Application commands with this index
pub fn count_acmd(sd: &Sdmmc<SimHost>, index: u8) -> usize {
    state(sd)
        .history()
        .iter()
        .filter(|c| c.index == index && c.app)
        .count()
}

/// Virtual time the driver spent in delays
pub fn elapsed_ms(sd: &Sdmmc<SimHost>) -> u64 {
    sd.controller().delay().elapsed_ms()
}
