//! High speed timing and bus width negotiation, run once the card is in
//! transfer state. Every step updates the slot only after the card confirmed it.

use crate::card::{CardState, CardStatus, Scr, switch_group1_selected, words_to_bytes};
use crate::config::DriverConfig;
use crate::driver::{app_command, command, settled_status};
use crate::error::{HostError, SdmmcError};
use crate::host::{Buffer, BusWidth, Command, Controller, ResponseKind, Transfer};
use crate::init::Probe;
use sdmmc_hw::protocol::{acmd, arg, cmd, csd, ext_csd, scr, switch_status};
use sdmmc_hw::specs::clock;
use tracing::{debug, warn};

pub(crate) fn tune<C: Controller>(
    ctrl: &mut C,
    probe: &mut Probe,
    config: &DriverConfig,
) -> Result<(), SdmmcError> {
    if probe.slot.kind.is_sd() {
        tune_sd(ctrl, probe, config)
    } else {
        tune_mmc(ctrl, probe, config)
    }
}

fn tune_sd<C: Controller>(
    ctrl: &mut C,
    probe: &mut Probe,
    config: &DriverConfig,
) -> Result<(), SdmmcError> {
    let slot = &mut probe.slot;
    let scr = match read_scr(ctrl, slot.rca) {
        Some(scr) => scr,
        None => {
            warn!("{:?}: SCR unreadable, assuming 4-bit bus without SET_BLOCK_COUNT", probe.dev);
            Scr::default()
        }
    };
    debug!("{:?}: {:?}", probe.dev, scr);

    if config.high_speed && slot.ccc & csd::CCC_SWITCH != 0 {
        let mut words = [0u32; switch_status::SIZE / 4];
        ctrl.issue(
            &Command::new(cmd::SWITCH, arg::SWITCH_FUNC_HS, ResponseKind::R1),
            Some(Transfer::new(
                1,
                switch_status::SIZE as u16,
                Buffer::Read(&mut words),
            )),
        )
        .map_err(|_| SdmmcError::SwitchHs)?;

        let mut raw = [0u8; switch_status::SIZE];
        words_to_bytes(&words, &mut raw);
        if switch_group1_selected(&raw) == switch_status::FUNC_HIGH_SPEED {
            slot.clock = ctrl.set_clock(clock::SD_HIGH_SPEED_HZ);
        } else {
            debug!("{:?}: high speed not accepted, staying at {} Hz", probe.dev, slot.clock);
        }
    }

    app_command(
        ctrl,
        slot.rca,
        Command::app(
            acmd::SET_CLR_CARD_DETECT,
            arg::CARD_DETECT_PULLUP_OFF,
            ResponseKind::R1,
        ),
        None,
    )
    .map_err(|_| SdmmcError::SetClrCd)?;

    if config.wide_bus && scr.supports_4bit() {
        app_command(
            ctrl,
            slot.rca,
            Command::app(acmd::SET_BUS_WIDTH, arg::SD_BUS_WIDTH_4, ResponseKind::R1),
            None,
        )
        .map_err(|_| SdmmcError::SetBusWidth)?;
        confirm_status(ctrl, slot.rca).ok_or(SdmmcError::SetBusWidth)?;
        ctrl.set_bus_width(BusWidth::Four);
        slot.bus_width = BusWidth::Four as u8;
    }

    slot.cmd23 = config.set_block_count && scr.supports_cmd23();
    Ok(())
}

fn read_scr<C: Controller>(ctrl: &mut C, rca: u16) -> Option<Scr> {
    let mut words = [0u32; scr::SIZE / 4];
    app_command(
        ctrl,
        rca,
        Command::app(acmd::SEND_SCR, 0, ResponseKind::R1),
        Some(Transfer::new(1, scr::SIZE as u16, Buffer::Read(&mut words))),
    )
    .ok()?;

    let mut raw = [0u8; scr::SIZE];
    words_to_bytes(&words, &mut raw);
    Some(Scr::parse(&raw))
}

fn tune_mmc<C: Controller>(
    ctrl: &mut C,
    probe: &mut Probe,
    config: &DriverConfig,
) -> Result<(), SdmmcError> {
    // SWITCH arrived with system specification 4.0
    let Some(ext) = probe.ext_csd else {
        debug!(
            "{:?}: MMC spec version {}, no bus tuning",
            probe.dev, probe.csd.spec_vers
        );
        return Ok(());
    };
    let slot = &mut probe.slot;

    if let Some(hs_clock) = ext.hs_clock_hz().filter(|_| config.high_speed) {
        mmc_switch(ctrl, ext_csd::HS_TIMING, ext_csd::HS_TIMING_HS)
            .map_err(|_| SdmmcError::SwitchHs)?;
        match settled_status(ctrl, slot.rca) {
            Ok(status) if switch_confirmed(status) => {
                slot.clock = ctrl.set_clock(hs_clock);
            }
            Ok(status) => {
                debug!(
                    "{:?}: HS_TIMING not accepted (status {:#010X})",
                    probe.dev,
                    status.bits()
                );
            }
            Err(_) => return Err(SdmmcError::SendStatus),
        }
    }

    if config.wide_bus {
        mmc_switch(ctrl, ext_csd::BUS_WIDTH, ext_csd::BUS_WIDTH_4)
            .map_err(|_| SdmmcError::SetBusWidth)?;
        confirm_status(ctrl, slot.rca).ok_or(SdmmcError::SetBusWidth)?;
        ctrl.set_bus_width(BusWidth::Four);
        slot.bus_width = BusWidth::Four as u8;
    }

    Ok(())
}

/// SWITCH, write byte access to an EXT_CSD field
fn mmc_switch<C: Controller>(ctrl: &mut C, index: u8, value: u8) -> Result<(), HostError> {
    command(
        ctrl,
        cmd::SWITCH,
        arg::mmc_switch(arg::MMC_SWITCH_WRITE_BYTE, index, value),
        ResponseKind::R1b,
    )
    .map(|_| ())
}

fn switch_confirmed(status: CardStatus) -> bool {
    !status.contains(CardStatus::SWITCH_ERROR)
        && status.transfer_errors().is_empty()
        && status.state() == CardState::Tran
}

/// Status round trip after a mode change
fn confirm_status<C: Controller>(ctrl: &mut C, rca: u16) -> Option<CardStatus> {
    settled_status(ctrl, rca)
        .ok()
        .filter(|status| switch_confirmed(*status))
}
