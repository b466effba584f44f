//! Sector reads and writes.

use crate::card::{CardState, CardStatus, WriteProtect};
use crate::config::DriverConfig;
use crate::driver::{Slot, command, send_status, settled_status};
use crate::error::{HostError, SdmmcError};
use crate::host::{Buffer, Command, Controller, Direction, ResponseKind, Transfer};
use sdmmc_hw::protocol::{SECTOR_SIZE, cmd};
use tracing::{debug, trace, warn};

/// Byte addresses of legacy cards must stay below 2 GiB
const BYTE_ADDRESS_LIMIT: u64 = 1 << 31;

/// SEND_STATUS polls while waiting for a card to drop back to transfer state
const RECOVERY_POLLS: u32 = 100;

const WORDS_PER_SECTOR: usize = SECTOR_SIZE / 4;

pub(crate) fn read<C: Controller>(
    ctrl: &mut C,
    slot: &Slot,
    config: &DriverConfig,
    sect: u32,
    mut buf: Option<&mut [u32]>,
    count: u16,
) -> Result<(), SdmmcError> {
    let address = validate(slot, sect, count, buf.as_deref().map(<[u32]>::len))?;

    let mut attempt = 0;
    let reported = loop {
        let buffer = match buf.as_deref_mut() {
            Some(words) => Buffer::Read(words),
            None => Buffer::Dma(Direction::Read),
        };
        match run(ctrl, slot, address, count, buffer) {
            Ok(reported) => break reported,
            Err(HostError::Crc) if attempt < config.read_retries => {
                attempt += 1;
                warn!(
                    "CRC error reading {} sector(s) at {}, retry {}/{}",
                    count, sect, attempt, config.read_retries
                );
            }
            Err(e) => {
                debug!("read of {} sector(s) at {} failed: {}", count, sect, e);
                return Err(SdmmcError::SectRw);
            }
        }
    };

    check_status(ctrl, slot.rca, reported)
}

/// Writes are never repeated, a partial write is visible on the card
pub(crate) fn write<C: Controller>(
    ctrl: &mut C,
    slot: &Slot,
    wp: WriteProtect,
    sect: u32,
    buf: Option<&[u32]>,
    count: u16,
) -> Result<(), SdmmcError> {
    let address = validate(slot, sect, count, buf.map(<[u32]>::len))?;
    if !wp.is_empty() {
        return Err(SdmmcError::WriteProt);
    }

    let buffer = match buf {
        Some(words) => Buffer::Write(words),
        None => Buffer::Dma(Direction::Write),
    };
    let reported = run(ctrl, slot, address, count, buffer).map_err(|e| {
        debug!("write of {} sector(s) at {} failed: {}", count, sect, e);
        SdmmcError::SectRw
    })?;

    check_status(ctrl, slot.rca, reported)
}

/// Check the request against the slot and return the card address argument
fn validate(slot: &Slot, sect: u32, count: u16, buf_words: Option<usize>) -> Result<u32, SdmmcError> {
    if !slot.is_present() {
        return Err(SdmmcError::NoCard);
    }
    if count == 0 {
        return Err(SdmmcError::InvalParam);
    }
    if buf_words.is_some_and(|len| len < count as usize * WORDS_PER_SECTOR) {
        return Err(SdmmcError::InvalParam);
    }

    let end = sect as u64 + count as u64;
    if end > slot.sectors as u64 {
        return Err(SdmmcError::InvalParam);
    }

    if slot.kind.byte_addressed() {
        if end * SECTOR_SIZE as u64 > BYTE_ADDRESS_LIMIT {
            return Err(SdmmcError::InvalParam);
        }
        Ok(sect * SECTOR_SIZE as u32)
    } else {
        Ok(sect)
    }
}

/// One attempt of a single or multi block transfer. Returns the error bits
/// the card reported when the transfer was stopped.
fn run<C: Controller>(
    ctrl: &mut C,
    slot: &Slot,
    address: u32,
    count: u16,
    buffer: Buffer<'_>,
) -> Result<CardStatus, HostError> {
    let dir = buffer.direction();
    let multi = count > 1;
    let preset = multi && slot.cmd23;
    let index = match (dir, multi) {
        (Direction::Read, false) => cmd::READ_SINGLE_BLOCK,
        (Direction::Read, true) => cmd::READ_MULTIPLE_BLOCK,
        (Direction::Write, false) => cmd::WRITE_BLOCK,
        (Direction::Write, true) => cmd::WRITE_MULTIPLE_BLOCK,
    };
    trace!(
        "CMD{} addr={:#X} count={} preset={}",
        index, address, count, preset
    );

    if preset {
        command(ctrl, cmd::SET_BLOCK_COUNT, count as u32, ResponseKind::R1)?;
    }

    let result = ctrl.issue(
        &Command::new(index, address, ResponseKind::R1),
        Some(Transfer::new(count, SECTOR_SIZE as u16, buffer)),
    );
    if let Err(e) = result {
        recover(ctrl, slot.rca);
        return Err(e);
    }

    if multi && !preset {
        return match command(ctrl, cmd::STOP_TRANSMISSION, 0, ResponseKind::R1b) {
            Ok(stop) => Ok(stop.r1().transfer_errors()),
            Err(e) => {
                recover(ctrl, slot.rca);
                Err(e)
            }
        };
    }
    Ok(CardStatus::empty())
}

/// Stop an interrupted data phase and wait for the card to settle in transfer state
fn recover<C: Controller>(ctrl: &mut C, rca: u16) {
    let in_data = !matches!(
        send_status(ctrl, rca).map(|s| s.state()),
        Ok(CardState::Tran | CardState::Prg)
    );
    if in_data {
        let _ = command(ctrl, cmd::STOP_TRANSMISSION, 0, ResponseKind::R1b);
    }

    for _ in 0..RECOVERY_POLLS {
        if matches!(send_status(ctrl, rca), Ok(s) if s.state() == CardState::Tran) {
            return;
        }
        ctrl.delay_ms(1);
    }
    warn!("card did not return to transfer state");
}

fn check_status<C: Controller>(
    ctrl: &mut C,
    rca: u16,
    reported: CardStatus,
) -> Result<(), SdmmcError> {
    let status = settled_status(ctrl, rca).map_err(|_| SdmmcError::SendStatus)? | reported;
    let errors = status.transfer_errors();
    if !errors.is_empty() {
        warn!("card status errors: {:?}", errors);
        return Err(SdmmcError::CardStatus);
    }
    if status.state() != CardState::Tran {
        warn!("card left in {:?} state", status.state());
        return Err(SdmmcError::SectRw);
    }
    Ok(())
}
