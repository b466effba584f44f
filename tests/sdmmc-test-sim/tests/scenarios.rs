//! Seed scenarios: the behaviour every port of the driver must reproduce.

use sdmmc::sim::{SdmmcState, SimCard};
use sdmmc::{Addressing, CardKind, SdmmcError, WriteProtect};
use sdmmc_hw::protocol::cmd;
use sim_test_helpers::*;

#[test]
fn init_on_empty_slot_reports_no_card() {
    let mut sd = empty();
    assert_eq!(sd.init(CARD), Err(SdmmcError::NoCard));
    assert_eq!(sd.init(EMMC), Err(SdmmcError::NoCard));
    assert_eq!(sd.sectors(CARD), 0);
    // Nothing went out on the bus
    assert!(history(&sd).is_empty());
}

#[test]
fn sdhc_32g_comes_up_wide_and_fast() {
    let sd = ready_card(SimCard::sdhc(SDHC_32G_SECTORS));

    assert_eq!(sd.sectors(CARD), 62_333_952);
    let info = sd.dev_info(CARD).unwrap();
    assert_eq!(info.kind, CardKind::Sdhc);
    assert_eq!(info.bus_width, 4);
    assert_eq!(info.clock, HIGH_SPEED_HZ);
    assert_eq!(info.addressing, Addressing::Block);
    assert_eq!(info.rca, 0xb368);
    assert_eq!(info.wr_prot, WriteProtect::empty());
    assert_ne!(info.ccc, 0);
    assert_ne!(info.cid, [0; 4]);

    let card = state(&sd).card(CARD).unwrap();
    assert_eq!(card.bus_width(), 4);
    assert!(card.high_speed_timing());
    assert_eq!(state(&sd).bus_width(), 4);
}

#[test]
fn permanently_protected_card_refuses_writes_but_reads() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).permanent_write_protect());
    clear_history(&mut sd);

    let data = pattern(0, 1);
    assert_eq!(
        sd.write_sectors(CARD, 0, Some(&data), 1),
        Err(SdmmcError::WriteProt)
    );
    assert_eq!(count_cmd(&sd, cmd::WRITE_BLOCK), 0);

    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 1), Ok(()));
    assert_eq!(sd.write_prot_bits(CARD), WriteProtect::PERM.bits());
}

#[test]
fn emmc_capacity_comes_from_ext_csd() {
    let sd = ready_emmc(SimCard::emmc(EMMC_4G_SECTORS));

    // C_SIZE 0xFFF would claim exactly 2^21 sectors
    assert_eq!(sd.sectors(EMMC), 7_634_944);
    let info = sd.dev_info(EMMC).unwrap();
    assert_eq!(info.kind, CardKind::MmcHc);
    assert_eq!(info.rca, 1);
    assert_eq!(info.bus_width, 4);
    assert_eq!(info.clock, HIGH_SPEED_HZ);
    assert_eq!(sd.sectors(CARD), 0);
}

#[test]
fn reading_at_sector_count_is_invalid() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    let sectors = sd.sectors(CARD);
    let mut buf = vec![0u32; WORDS];
    assert_eq!(
        sd.read_sectors(CARD, sectors, Some(&mut buf), 1),
        Err(SdmmcError::InvalParam)
    );
}

#[test]
fn second_init_reports_initialized() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    let before = sd.dev_info(CARD).unwrap();
    clear_history(&mut sd);

    assert_eq!(sd.init(CARD), Err(SdmmcError::Initialized));
    assert_eq!(sd.dev_info(CARD).unwrap(), before);
    assert!(history(&sd).is_empty());
}

#[test]
fn card_and_emmc_are_independent_slots() {
    let host = SdmmcState::new()
        .with_card(SimCard::sdhc(1 << 20))
        .with_emmc(SimCard::emmc(EMMC_4G_SECTORS));
    let mut sd = sdmmc::sim::driver(host);
    sd.init(CARD).unwrap();
    sd.init(EMMC).unwrap();

    let a = pattern(100, 2);
    let b = pattern(900, 2);
    sd.write_sectors(CARD, 10, Some(&a), 2).unwrap();
    sd.write_sectors(EMMC, 10, Some(&b), 2).unwrap();

    let mut buf = vec![0u32; 2 * WORDS];
    sd.read_sectors(CARD, 10, Some(&mut buf), 2).unwrap();
    assert_eq!(buf, a);
    sd.read_sectors(EMMC, 10, Some(&mut buf), 2).unwrap();
    assert_eq!(buf, b);

    sd.deinit(CARD).unwrap();
    assert_eq!(sd.sectors(EMMC), 7_634_944);
}
