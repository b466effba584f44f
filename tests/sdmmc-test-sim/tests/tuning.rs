use sdmmc::sim::{SdmmcState, SimCard};
use sdmmc::{DriverConfig, SdmmcError};
use sdmmc_hw::protocol::{acmd, cmd};
use sim_test_helpers::*;

fn config(high_speed: bool, wide_bus: bool) -> DriverConfig {
    DriverConfig {
        high_speed,
        wide_bus,
        ..DriverConfig::default()
    }
}

#[test]
fn sd_tuning_sequence() {
    let sd = ready_card(SimCard::sdhc(1 << 20));
    let tuning: Vec<(u8, bool)> = history(&sd)
        .iter()
        .skip_while(|c| c.index != cmd::SELECT_CARD)
        .filter(|c| c.index != cmd::APP_CMD && c.index != cmd::SEND_STATUS)
        .map(|c| (c.index, c.app))
        .collect();
    assert_eq!(
        tuning,
        [
            (cmd::SELECT_CARD, false),
            (acmd::SEND_SCR, true),
            (cmd::SWITCH, false),
            (acmd::SET_CLR_CARD_DETECT, true),
            (acmd::SET_BUS_WIDTH, true),
        ]
    );
}

#[test]
fn sd_high_speed_can_be_turned_off() {
    let host = SdmmcState::new().with_card(SimCard::sdhc(1 << 20));
    let mut sd = with_config(host, config(false, true));
    sd.init(CARD).unwrap();

    let info = sd.dev_info(CARD).unwrap();
    assert_eq!(info.clock, DEFAULT_SPEED_HZ);
    assert_eq!(info.bus_width, 4);
    assert_eq!(count_cmd(&sd, cmd::SWITCH), 0);
    assert!(!state(&sd).card(CARD).unwrap().high_speed_timing());
}

#[test]
fn sd_card_refusing_high_speed_stays_at_default_clock() {
    let sd = ready_card(SimCard::sdhc(1 << 20).without_high_speed());
    let info = sd.dev_info(CARD).unwrap();
    assert_eq!(info.clock, DEFAULT_SPEED_HZ);
    assert_eq!(info.bus_width, 4);
    assert_eq!(count_cmd(&sd, cmd::SWITCH), 1);
}

#[test]
fn sd_one_bit_card_keeps_the_narrow_bus() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).one_bit_only());
    assert_eq!(sd.dev_info(CARD).unwrap().bus_width, 1);
    assert_eq!(count_acmd(&sd, acmd::SET_BUS_WIDTH), 0);
    assert_eq!(state(&sd).bus_width(), 1);

    let data = pattern(3, 2);
    sd.write_sectors(CARD, 3, Some(&data), 2).unwrap();
    let mut back = vec![0u32; data.len()];
    sd.read_sectors(CARD, 3, Some(&mut back), 2).unwrap();
    assert_eq!(back, data);
}

#[test]
fn wide_bus_can_be_turned_off() {
    let host = SdmmcState::new()
        .with_card(SimCard::sdhc(1 << 20))
        .with_emmc(SimCard::emmc(1 << 20));
    let mut sd = with_config(host, config(true, false));
    sd.init(CARD).unwrap();
    sd.init(EMMC).unwrap();

    assert_eq!(sd.dev_info(CARD).unwrap().bus_width, 1);
    assert_eq!(sd.dev_info(EMMC).unwrap().bus_width, 1);
    assert_eq!(sd.dev_info(CARD).unwrap().clock, HIGH_SPEED_HZ);
    assert_eq!(sd.dev_info(EMMC).unwrap().clock, HIGH_SPEED_HZ);
}

#[test]
fn emmc_switches_timing_then_width() {
    let sd = ready_emmc(SimCard::emmc(1 << 20));
    let switches: Vec<u32> = history(&sd)
        .iter()
        .filter(|c| c.index == cmd::SWITCH)
        .map(|c| c.arg)
        .collect();
    // Write byte: HS_TIMING (185) = 1, then BUS_WIDTH (183) = 1
    assert_eq!(switches, [0x03b9_0100, 0x03b7_0100]);

    let card = state(&sd).card(EMMC).unwrap();
    assert!(card.high_speed_timing());
    assert_eq!(card.bus_width(), 4);
}

#[test]
fn emmc_without_high_speed_skips_the_timing_switch() {
    let sd = ready_emmc(SimCard::emmc(1 << 20).without_high_speed());
    let info = sd.dev_info(EMMC).unwrap();
    assert_eq!(info.clock, DEFAULT_SPEED_HZ);
    assert_eq!(info.bus_width, 4);
    assert_eq!(count_cmd(&sd, cmd::SWITCH), 1);
}

#[test]
fn rejected_emmc_bus_width_switch_fails_init() {
    let mut sd = with_emmc(SimCard::emmc(1 << 20).one_bit_only());
    assert_eq!(sd.init(EMMC), Err(SdmmcError::SetBusWidth));
    assert_eq!(sd.sectors(EMMC), 0);
}

#[test]
fn ports_keep_their_own_clock_and_width() {
    let host = SdmmcState::new()
        .with_card(SimCard::sdhc(1 << 20).one_bit_only())
        .with_emmc(SimCard::emmc(1 << 20));
    let mut sd = sdmmc::sim::driver(host);
    sd.init(CARD).unwrap();
    sd.init(EMMC).unwrap();

    let mut buf = vec![0u32; WORDS];
    sd.read_sectors(CARD, 0, Some(&mut buf), 1).unwrap();
    assert_eq!(state(&sd).bus_width(), 1);
    sd.read_sectors(EMMC, 0, Some(&mut buf), 1).unwrap();
    assert_eq!(state(&sd).bus_width(), 4);
    sd.read_sectors(CARD, 0, Some(&mut buf), 1).unwrap();
    assert_eq!(state(&sd).bus_width(), 1);
}
