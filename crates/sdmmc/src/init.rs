//! Power-on to transfer state: probe, OCR negotiation, identification,
//! CSD/EXT_CSD decoding and card selection.

use crate::card::{CardKind, CardStatus, Csd, ExtCsd, Ocr, WriteProtect, words_to_bytes};
use crate::config::DriverConfig;
use crate::driver::{Device, Slot, app_command, command, slider_engaged};
use crate::error::{HostError, SdmmcError};
use crate::host::{Buffer, BusWidth, Command, Controller, Response, ResponseKind, Transfer};
use sdmmc_hw::protocol::{SECTOR_SIZE, acmd, arg, cmd, ext_csd, ocr};
use sdmmc_hw::specs::clock;
use tracing::{debug, trace, warn};

/// RCA the host assigns to an MMC
const MMC_RCA: u16 = 1;

/// Card after identification, before bus tuning
#[derive(Debug)]
pub(crate) struct Probe {
    pub dev: Device,
    pub slot: Slot,
    pub csd: Csd,
    pub ext_csd: Option<ExtCsd>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    /// SD; `v2` when SEND_IF_COND was answered
    Sd { v2: bool },
    Mmc,
}

pub(crate) fn identify<C: Controller>(
    ctrl: &mut C,
    dev: Device,
    config: &DriverConfig,
) -> Result<Probe, SdmmcError> {
    ctrl.select_port(dev as u8);
    if !ctrl.card_present() {
        return Err(SdmmcError::NoCard);
    }

    // Stage A
    ctrl.reset();
    let mut slot = Slot {
        clock: ctrl.set_clock(clock::INIT_HZ),
        bus_width: BusWidth::One as u8,
        ..Slot::default()
    };
    ctrl.set_bus_width(BusWidth::One);
    // >= 74 clocks of power-up ramp
    let ramp_ms = (clock::POWER_UP_CYCLES * 1000).div_ceil(slot.clock.max(1)).max(1);
    ctrl.delay_ms(ramp_ms);

    command(ctrl, cmd::GO_IDLE_STATE, 0, ResponseKind::None)
        .map_err(|_| SdmmcError::GoIdleState)?;

    let family = probe_family(ctrl, dev)?;
    debug!("{:?}: probed as {:?}", dev, family);

    // Stage B
    let ocr = match family {
        Family::Sd { v2 } => {
            let hcs = if v2 { ocr::HCS } else { 0 };
            op_cond(ctrl, config, |ctrl| {
                app_command(
                    ctrl,
                    0,
                    Command::app(acmd::SD_SEND_OP_COND, ocr::HOST_VDD | hcs, ResponseKind::R3),
                    None,
                )
            })?
        }
        Family::Mmc => op_cond(ctrl, config, |ctrl| {
            command(
                ctrl,
                cmd::SEND_OP_COND,
                ocr::HOST_VDD | ocr::MMC_SECTOR_MODE,
                ResponseKind::R3,
            )
        })?,
    };
    slot.kind = match family {
        Family::Sd { v2: true } if ocr.high_capacity() => CardKind::Sdhc,
        Family::Sd { .. } => CardKind::Sdsc,
        Family::Mmc if ocr.high_capacity() => CardKind::MmcHc,
        Family::Mmc => CardKind::Mmc,
    };
    debug!("{:?}: OCR {:#010X}, {:?}", dev, ocr.0, slot.kind);

    // Stage C
    let cid = command(ctrl, cmd::ALL_SEND_CID, 0, ResponseKind::R2)
        .map_err(|_| SdmmcError::AllSendCid)?;
    slot.cid = cid.r2();

    slot.rca = if slot.kind.is_sd() {
        command(ctrl, cmd::SET_RELATIVE_ADDR, 0, ResponseKind::R6)
            .map_err(|_| SdmmcError::SetSendRca)?
            .r6_rca()
    } else {
        command(ctrl, cmd::SET_RELATIVE_ADDR, arg::rca(MMC_RCA), ResponseKind::R1)
            .map_err(|_| SdmmcError::SetSendRca)?;
        MMC_RCA
    };
    trace!("{:?}: RCA {:#06X}", dev, slot.rca);

    // Stage D
    let raw = command(ctrl, cmd::SEND_CSD, arg::rca(slot.rca), ResponseKind::R2)
        .map_err(|_| SdmmcError::SendCsd)?;
    let csd = Csd::parse(&raw.r2(), slot.kind.is_sd());
    slot.ccc = csd.ccc;
    slot.wr_prot = csd.write_protect();
    if slider_engaged(ctrl, dev) {
        slot.wr_prot |= WriteProtect::SLIDER;
    }

    let mut sectors = if slot.kind.is_sd() {
        if csd.structure == 2 {
            slot.kind = CardKind::Sduc;
        }
        csd.sd_sectors()
    } else {
        csd.mmc_sectors().unwrap_or(0)
    };

    // Stage E
    let selected = command(ctrl, cmd::SELECT_CARD, arg::rca(slot.rca), ResponseKind::R1b)
        .map_err(|_| SdmmcError::SelectCard)?;
    if selected.r1().contains(CardStatus::CARD_IS_LOCKED) {
        return Err(SdmmcError::Locked);
    }

    slot.clock = ctrl.set_clock(if slot.kind.is_sd() {
        clock::SD_DEFAULT_HZ
    } else {
        clock::MMC_DEFAULT_HZ
    });

    if slot.kind.byte_addressed() {
        // READ_BL_LEN may be larger than a sector on these cards
        command(ctrl, cmd::SET_BLOCKLEN, SECTOR_SIZE as u32, ResponseKind::R1)
            .map_err(|_| SdmmcError::SelectCard)?;
    }

    // Stage F
    let mut ext = None;
    if slot.kind.is_mmc() && csd.mmc_has_ext_csd() {
        let ext_csd = read_ext_csd(ctrl)?;
        if ext_csd.sec_count != 0 {
            sectors = ext_csd.sec_count as u64;
        }
        ext = Some(ext_csd);
    }

    if sectors == 0 {
        warn!("{:?}: card reports no capacity", dev);
        return Err(if slot.kind.is_mmc() {
            SdmmcError::SendExtCsd
        } else {
            SdmmcError::SendCsd
        });
    }
    slot.sectors = u32::try_from(sectors).unwrap_or(u32::MAX);

    Ok(Probe {
        dev,
        slot,
        csd,
        ext_csd: ext,
    })
}

/// SEND_IF_COND, and for legacy cards in the card slot an APP_CMD probe
fn probe_family<C: Controller>(ctrl: &mut C, dev: Device) -> Result<Family, SdmmcError> {
    match command(ctrl, cmd::SEND_IF_COND, arg::IF_COND, ResponseKind::R7) {
        Ok(resp) => {
            let echo = resp.r7() & (arg::IF_COND_VHS_MASK | 0xff);
            if echo != arg::IF_COND {
                debug!("{:?}: IF_COND echo {:#X}", dev, resp.r7());
                return Err(SdmmcError::IfCondResp);
            }
            Ok(Family::Sd { v2: true })
        }
        Err(HostError::CmdTimeout) if dev == Device::Emmc => Ok(Family::Mmc),
        Err(HostError::CmdTimeout) => {
            // SD 1.x answers APP_CMD, MMC does not
            match command(ctrl, cmd::APP_CMD, 0, ResponseKind::R1) {
                Ok(_) => Ok(Family::Sd { v2: false }),
                Err(HostError::CmdTimeout) => Ok(Family::Mmc),
                Err(_) => Err(SdmmcError::SendOpCond),
            }
        }
        Err(_) => Err(SdmmcError::SendIfCond),
    }
}

/// Poll an OP_COND command until the card reports power-up done
fn op_cond<C, F>(ctrl: &mut C, config: &DriverConfig, mut send: F) -> Result<Ocr, SdmmcError>
where
    C: Controller,
    F: FnMut(&mut C) -> Result<Response, HostError>,
{
    for _ in 0..config.op_cond_tries {
        let ocr = Ocr(send(ctrl).map_err(|_| SdmmcError::SendOpCond)?.ocr());
        if ocr.0 & ocr::VDD_WINDOW_MASK != 0 && !ocr.supports(ocr::HOST_VDD) {
            return Err(SdmmcError::VoltSupport);
        }
        if ocr.ready() {
            return Ok(ocr);
        }
        ctrl.delay_ms(config.op_cond_poll_ms);
    }
    Err(SdmmcError::OpCondTimeout)
}

fn read_ext_csd<C: Controller>(ctrl: &mut C) -> Result<ExtCsd, SdmmcError> {
    let mut words = [0u32; ext_csd::SIZE / 4];
    ctrl.issue(
        &Command::new(cmd::SEND_EXT_CSD, 0, ResponseKind::R1),
        Some(Transfer::new(1, ext_csd::SIZE as u16, Buffer::Read(&mut words))),
    )
    .map_err(|_| SdmmcError::SendExtCsd)?;

    let mut raw = [0u8; ext_csd::SIZE];
    words_to_bytes(&words, &mut raw);
    Ok(ExtCsd::parse(&raw))
}
