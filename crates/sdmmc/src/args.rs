use crate::config::DriverConfig;
use crate::sim::{SdmmcState, SimCard};
use clap::{Parser, Subcommand, ValueEnum};
use sdmmc_hw::protocol::SECTOR_SIZE;
use std::path::{Path, PathBuf};
use tracing::info;

/// Largest capacity a standard capacity card can report (version 1 CSD)
const SDSC_MAX_SECTORS: u64 = 4 << 20;

#[derive(Parser, Debug, Clone)]
#[command(name = "sdmmc-cli", about = "Drive simulated SD/eMMC cards through the SD/MMC driver")]
pub struct Args {
    /// SD card image to insert into the card slot (device 0)
    #[arg(long)]
    pub sd_card: Option<PathBuf>,

    /// Image backing the soldered eMMC (device 1)
    #[arg(long)]
    pub emmc: Option<PathBuf>,

    /// Card type the SD image is presented as
    #[arg(long, value_enum, default_value_t = SdKind::Auto)]
    pub sd_kind: SdKind,

    /// Stay at default speed timing
    #[arg(long)]
    pub no_high_speed: bool,

    /// Keep the 1-bit bus
    #[arg(long)]
    pub one_bit: bool,

    /// Times a read is repeated after a CRC error
    #[arg(long, default_value_t = 3)]
    pub read_retries: u32,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Action {
    /// Initialize a device and print its descriptor
    Info {
        /// 0 = SD card, 1 = eMMC
        dev: u8,
    },

    /// Read sectors; hex dump unless --out is given
    Read {
        dev: u8,

        /// First sector (hex: 0x1234 or decimal: 1234)
        #[arg(value_parser = parse_hex_or_dec)]
        sector: u32,

        #[arg(long, short = 'n', default_value_t = 1)]
        count: u16,

        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Write a file to consecutive sectors, zero padding the last one
    Write {
        dev: u8,

        /// First sector (hex: 0x1234 or decimal: 1234)
        #[arg(value_parser = parse_hex_or_dec)]
        sector: u32,

        input: PathBuf,
    },

    /// Print a file from the FAT partition of the SD card
    Cat {
        /// Path inside the FAT file system (e.g., "boot.firm")
        path: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdKind {
    /// SDHC above 2 GiB, SDSC otherwise
    Auto,
    Sdhc,
    Sdsc,
}

impl Args {
    /// Validate that the arguments are consistent
    pub fn validate(&self) -> Result<(), String> {
        let dev = match &self.action {
            Action::Info { dev } | Action::Read { dev, .. } | Action::Write { dev, .. } => *dev,
            Action::Cat { .. } => 0,
        };
        match dev {
            0 if self.sd_card.is_none() => Err("device 0 requires --sd-card".to_string()),
            1 if self.emmc.is_none() => Err("device 1 requires --emmc".to_string()),
            0 | 1 => Ok(()),
            _ => Err(format!("unknown device {} (0 = SD card, 1 = eMMC)", dev)),
        }
    }

    /// Convert Args to DriverConfig
    pub fn to_driver_config(&self) -> DriverConfig {
        DriverConfig {
            read_retries: self.read_retries,
            high_speed: !self.no_high_speed,
            wide_bus: !self.one_bit,
            ..DriverConfig::default()
        }
    }

    /// Simulated controller with the given images attached
    pub fn build_host(&self) -> std::io::Result<SdmmcState> {
        let mut state = SdmmcState::new();
        if let Some(path) = &self.sd_card {
            let sectors = image_sectors(path)?;
            let kind = match self.sd_kind {
                SdKind::Auto if sectors > SDSC_MAX_SECTORS => SdKind::Sdhc,
                SdKind::Auto => SdKind::Sdsc,
                kind => kind,
            };
            info!("SD card image {:?}: {} sectors as {:?}", path, sectors, kind);
            let card = match kind {
                SdKind::Sdhc => SimCard::sdhc(sectors),
                _ => SimCard::sdsc(sectors),
            };
            state.insert(0, card.with_image(path)?);
        }
        if let Some(path) = &self.emmc {
            let sectors = image_sectors(path)?;
            info!("eMMC image {:?}: {} sectors", path, sectors);
            state.insert(1, SimCard::emmc(sectors).with_image(path)?);
        }
        Ok(state)
    }
}

fn image_sectors(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len() / SECTOR_SIZE as u64)
}

pub fn parse_hex_or_dec(s: &str) -> Result<u32, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}
