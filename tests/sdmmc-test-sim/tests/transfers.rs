use sdmmc::sim::{SdmmcState, SimCard};
use sdmmc::{CardState, DriverConfig, SdmmcError, WriteProtect};
use sdmmc_hw::protocol::cmd;
use sim_test_helpers::*;

#[test]
fn crc_errors_on_reads_are_retried() {
    let mut card = SimCard::sdhc(1 << 20).read_crc_failures(2);
    card.poke(12, &to_bytes(&pattern(12, 1)));
    // Init reads only register blocks, which never fail their CRC
    let mut sd = ready_card(card);
    clear_history(&mut sd);

    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 12, Some(&mut buf), 1), Ok(()));
    assert_eq!(buf, pattern(12, 1));
    assert_eq!(count_cmd(&sd, cmd::READ_SINGLE_BLOCK), 3);
}

#[test]
fn crc_retries_are_bounded() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).read_crc_failures(4));
    clear_history(&mut sd);

    let mut buf = vec![0u32; 4 * WORDS];
    assert_eq!(
        sd.read_sectors(CARD, 0, Some(&mut buf), 4),
        Err(SdmmcError::SectRw)
    );
    assert_eq!(count_cmd(&sd, cmd::READ_MULTIPLE_BLOCK), 4);

    // Every failed attempt left the card in transfer state
    assert_eq!(state(&sd).card(CARD).unwrap().state(), CardState::Tran);
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 4), Ok(()));
}

#[test]
fn retries_can_be_disabled() {
    let config = DriverConfig {
        read_retries: 0,
        ..DriverConfig::default()
    };
    let host = SdmmcState::new().with_card(SimCard::sdhc(1 << 20).read_crc_failures(1));
    let mut sd = with_config(host, config);
    sd.init(CARD).unwrap();

    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 1), Err(SdmmcError::SectRw));
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 1), Ok(()));
}

#[test]
fn ecc_failure_is_a_card_status_error() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).ecc_errors(10..11));
    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 9, Some(&mut buf), 1), Ok(()));
    assert_eq!(
        sd.read_sectors(CARD, 10, Some(&mut buf), 1),
        Err(SdmmcError::CardStatus)
    );
    // The error is not sticky
    assert_eq!(sd.read_sectors(CARD, 11, Some(&mut buf), 1), Ok(()));
}

#[test]
fn ecc_failure_reported_with_stop_transmission() {
    let mut sd = ready_emmc(SimCard::emmc(1 << 20).ecc_errors(20..21));
    let mut buf = vec![0u32; 4 * WORDS];
    assert_eq!(
        sd.read_sectors(EMMC, 18, Some(&mut buf), 4),
        Err(SdmmcError::CardStatus)
    );
}

#[test]
fn sd_multi_block_uses_set_block_count() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    clear_history(&mut sd);

    let data = pattern(300, 8);
    sd.write_sectors(CARD, 300, Some(&data), 8).unwrap();
    let mut back = vec![0u32; data.len()];
    sd.read_sectors(CARD, 300, Some(&mut back), 8).unwrap();
    assert_eq!(back, data);

    let indices: Vec<u8> = history(&sd)
        .iter()
        .map(|c| c.index)
        .filter(|&i| i != cmd::SEND_STATUS)
        .collect();
    assert_eq!(
        indices,
        [
            cmd::SET_BLOCK_COUNT,
            cmd::WRITE_MULTIPLE_BLOCK,
            cmd::SET_BLOCK_COUNT,
            cmd::READ_MULTIPLE_BLOCK
        ]
    );
    let preset = history(&sd)
        .into_iter()
        .find(|c| c.index == cmd::SET_BLOCK_COUNT)
        .unwrap();
    assert_eq!(preset.arg, 8);
}

#[test]
fn multi_block_without_cmd23_is_stopped() {
    let cases = [
        with_card(SimCard::sdhc(1 << 20).without_cmd23()),
        with_config(
            SdmmcState::new().with_card(SimCard::sdhc(1 << 20)),
            DriverConfig {
                set_block_count: false,
                ..DriverConfig::default()
            },
        ),
    ];
    for mut sd in cases {
        sd.init(CARD).unwrap();
        clear_history(&mut sd);

        let data = pattern(0, 3);
        sd.write_sectors(CARD, 0, Some(&data), 3).unwrap();
        let mut back = vec![0u32; data.len()];
        sd.read_sectors(CARD, 0, Some(&mut back), 3).unwrap();
        assert_eq!(back, data);

        assert_eq!(count_cmd(&sd, cmd::SET_BLOCK_COUNT), 0);
        assert_eq!(count_cmd(&sd, cmd::STOP_TRANSMISSION), 2);
    }
}

#[test]
fn emmc_multi_block_is_stopped() {
    let mut sd = ready_emmc(SimCard::emmc(1 << 20));
    clear_history(&mut sd);
    let mut buf = vec![0u32; 2 * WORDS];
    sd.read_sectors(EMMC, 0, Some(&mut buf), 2).unwrap();
    assert_eq!(count_cmd(&sd, cmd::SET_BLOCK_COUNT), 0);
    assert_eq!(count_cmd(&sd, cmd::STOP_TRANSMISSION), 1);
}

#[test]
fn unanswered_stop_still_returns_the_card_to_transfer_state() {
    let cases = [
        SimCard::sdhc(1 << 20).without_cmd23().lost_stop_responses(1),
        SimCard::legacy_mmc(1 << 16).lost_stop_responses(1),
    ];
    for card in cases {
        let mut sd = ready_card(card);
        clear_history(&mut sd);

        let mut buf = vec![0u32; 2 * WORDS];
        assert_eq!(
            sd.read_sectors(CARD, 0, Some(&mut buf), 2),
            Err(SdmmcError::SectRw)
        );
        // The lost stop, then the one sent while recovering
        assert_eq!(count_cmd(&sd, cmd::STOP_TRANSMISSION), 2);
        assert_eq!(state(&sd).card(CARD).unwrap().state(), CardState::Tran);

        let data = pattern(0, 2);
        sd.write_sectors(CARD, 0, Some(&data), 2).unwrap();
        sd.read_sectors(CARD, 0, Some(&mut buf), 2).unwrap();
        assert_eq!(buf, data);
    }
}

#[test]
fn single_block_never_stops() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).without_cmd23());
    clear_history(&mut sd);
    let data = pattern(1, 1);
    sd.write_sectors(CARD, 1, Some(&data), 1).unwrap();
    let mut back = vec![0u32; WORDS];
    sd.read_sectors(CARD, 1, Some(&mut back), 1).unwrap();
    assert_eq!(count_cmd(&sd, cmd::STOP_TRANSMISSION), 0);
    assert_eq!(count_cmd(&sd, cmd::WRITE_BLOCK), 1);
    assert_eq!(count_cmd(&sd, cmd::READ_SINGLE_BLOCK), 1);
}

#[test]
fn write_waits_for_programming_to_finish() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    let data = pattern(5, 1);
    sd.write_sectors(CARD, 5, Some(&data), 1).unwrap();
    assert_eq!(state(&sd).card(CARD).unwrap().state(), CardState::Tran);
}

#[test]
fn slider_blocks_writes_on_the_card_slot() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    assert_eq!(sd.write_prot_bits(CARD), 0);

    state_mut(&mut sd).set_slider(true);
    assert_eq!(sd.write_prot_bits(CARD), WriteProtect::SLIDER.bits());
    let data = pattern(0, 1);
    assert_eq!(sd.write_sectors(CARD, 0, Some(&data), 1), Err(SdmmcError::WriteProt));
    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 1), Ok(()));

    state_mut(&mut sd).set_slider(false);
    assert_eq!(sd.write_prot_bits(CARD), 0);
    assert_eq!(sd.write_sectors(CARD, 0, Some(&data), 1), Ok(()));
}

#[test]
fn slider_sampled_at_init_is_remembered() {
    let mut host = SdmmcState::new().with_card(SimCard::sdhc(1 << 20));
    host.set_slider(true);
    let mut sd = sdmmc::sim::driver(host);
    sd.init(CARD).unwrap();

    assert!(sd.dev_info(CARD).unwrap().wr_prot.contains(WriteProtect::SLIDER));
    state_mut(&mut sd).set_slider(false);
    // The recorded bit stays, so the card stays protected until re-init
    assert_eq!(sd.write_prot_bits(CARD), WriteProtect::SLIDER.bits());
}

#[test]
fn slider_does_not_apply_to_the_emmc() {
    let mut host = SdmmcState::new().with_emmc(SimCard::emmc(1 << 20));
    host.set_slider(true);
    let mut sd = sdmmc::sim::driver(host);
    sd.init(EMMC).unwrap();

    assert_eq!(sd.write_prot_bits(EMMC), 0);
    let data = pattern(0, 1);
    assert_eq!(sd.write_sectors(EMMC, 0, Some(&data), 1), Ok(()));
}

#[test]
fn temporary_protection_blocks_writes() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).temporary_write_protect());
    assert_eq!(sd.write_prot_bits(CARD), WriteProtect::TEMP.bits());
    let data = pattern(0, 1);
    assert_eq!(sd.write_sectors(CARD, 0, Some(&data), 1), Err(SdmmcError::WriteProt));
}
