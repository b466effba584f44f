//! Bare-metal (e)MMC / SD memory card driver for the 3DS SD/MMC host controller.
//!
//! The driver brings a removable SD card (device 0) or the soldered eMMC
//! (device 1) from power-on to transfer state and then moves 512-byte sectors
//! through a [`host::Controller`]. [`toshsd::Toshsd`] is the register-level
//! controller for the TMIO-style host; with the `std` feature the [`sim`]
//! module provides a simulated host and cards to run it against.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod card;
pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod toshsd;

mod init;
mod transfer;
mod tuning;

#[cfg(feature = "cli")]
pub mod args;
#[cfg(feature = "std")]
pub mod disk;
#[cfg(feature = "std")]
pub mod sim;

// Re-export commonly used types
pub use card::{CardKind, CardState, CardStatus, WriteProtect};
pub use config::DriverConfig;
pub use driver::{Addressing, DevInfo, Device, Sdmmc};
pub use error::{HostError, SdmmcError};
pub use host::{Buffer, BusWidth, Command, Controller, Direction, ResponseKind, Transfer};
pub use toshsd::Toshsd;

pub use sdmmc_hw::protocol::SECTOR_SIZE;

#[cfg(feature = "cli")]
pub use args::{Action, Args};
