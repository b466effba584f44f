use sdmmc::sim::SimCard;
use sdmmc::{CardKind, DevInfo, SdmmcError, WriteProtect};
use sim_test_helpers::*;

#[test]
fn initialized_devices_have_capacity_and_a_kind() {
    for card in [
        SimCard::sdhc(1 << 20),
        SimCard::sdsc(1 << 16),
        SimCard::sdsc_v1(1 << 16),
        SimCard::legacy_mmc(1 << 16),
    ] {
        let sd = ready_card(card);
        assert!(sd.sectors(CARD) > 0);
        assert_ne!(sd.dev_info(CARD).unwrap().kind, CardKind::None);
    }

    let sd = ready_emmc(SimCard::emmc(EMMC_4G_SECTORS));
    assert!(sd.sectors(EMMC) > 0);
    assert_ne!(sd.dev_info(EMMC).unwrap().kind, CardKind::None);
}

#[test]
fn deinit_returns_every_accessor_to_the_absent_sentinel() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).temporary_write_protect());
    sd.deinit(CARD).unwrap();

    assert_eq!(sd.dev_info(CARD).unwrap(), DevInfo::default());
    assert_eq!(sd.cid(CARD).unwrap(), [0; 4]);
    assert_eq!(sd.write_prot_bits(CARD), 0xff);
    assert_eq!(sd.sectors(CARD), 0);

    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 1), Err(SdmmcError::NoCard));
    assert_eq!(sd.write_sectors(CARD, 0, Some(&buf), 1), Err(SdmmcError::NoCard));

    // Deinit of an absent device is harmless, and the card comes back on init
    assert_eq!(sd.deinit(CARD), Ok(()));
    assert_eq!(sd.init(CARD), Ok(()));
    assert!(sd.sectors(CARD) > 0);
}

#[test]
fn permanent_protection_stays_set() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20).permanent_write_protect());
    let perm = WriteProtect::PERM.bits();
    assert_ne!(sd.write_prot_bits(CARD) & perm, 0);

    let mut buf = vec![0u32; WORDS];
    for sector in 0..4 {
        sd.read_sectors(CARD, sector, Some(&mut buf), 1).unwrap();
        let _ = sd.write_sectors(CARD, sector, Some(&buf), 1);
        state_mut(&mut sd).set_slider(sector % 2 == 0);
        assert_ne!(sd.write_prot_bits(CARD) & perm, 0);
    }
}

#[test]
fn repeated_reads_return_the_same_data() {
    let mut card = SimCard::sdhc(1 << 20);
    for sector in 40..48 {
        card.poke(sector, &to_bytes(&pattern(sector as u32, 1)));
    }
    let mut sd = ready_card(card);

    let mut first = vec![0u32; 8 * WORDS];
    let mut second = vec![0u32; 8 * WORDS];
    sd.read_sectors(CARD, 40, Some(&mut first), 8).unwrap();
    sd.read_sectors(CARD, 40, Some(&mut second), 8).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, pattern(40, 8));
}

#[test]
fn written_data_reads_back() {
    let cases = [
        (SimCard::sdhc(1 << 20), CARD),
        (SimCard::sdsc(1 << 16), CARD),
        (SimCard::legacy_mmc(1 << 16), CARD),
        (SimCard::emmc(1 << 20), EMMC),
    ];
    for (card, dev) in cases {
        let mut sd = if dev == CARD {
            ready_card(card)
        } else {
            ready_emmc(card)
        };
        for (sector, count) in [(0u32, 1u16), (7, 3), (1000, 16)] {
            let data = pattern(sector, count as usize);
            sd.write_sectors(dev, sector, Some(&data), count).unwrap();
            let mut back = vec![0u32; data.len()];
            sd.read_sectors(dev, sector, Some(&mut back), count).unwrap();
            assert_eq!(back, data, "dev {} sector {} count {}", dev, sector, count);
        }
    }
}

#[test]
fn failed_init_leaves_the_slot_absent() {
    for card in [
        SimCard::sdhc(1 << 20).locked(),
        SimCard::sdhc(1 << 20).never_ready(),
        SimCard::sdhc(1 << 20).corrupt_if_cond(),
    ] {
        let mut sd = with_card(card);
        assert!(sd.init(CARD).is_err());
        assert_eq!(sd.dev_info(CARD).unwrap(), DevInfo::default());
        assert_eq!(sd.sectors(CARD), 0);
        assert_eq!(sd.write_prot_bits(CARD), 0xff);
    }
}

#[test]
fn failed_transfers_leave_slot_and_card_untouched() {
    let mut card = SimCard::sdhc(4096).temporary_write_protect();
    card.poke(5, &[0x77; 512]);
    let mut sd = ready_card(card);
    let before = sd.dev_info(CARD).unwrap();

    let data = pattern(5, 1);
    assert_eq!(sd.write_sectors(CARD, 5, Some(&data), 1), Err(SdmmcError::WriteProt));
    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.read_sectors(CARD, 4096, Some(&mut buf), 1), Err(SdmmcError::InvalParam));
    assert_eq!(sd.read_sectors(CARD, 0, Some(&mut buf), 0), Err(SdmmcError::InvalParam));
    assert_eq!(buf, vec![0u32; WORDS]);

    assert_eq!(sd.dev_info(CARD).unwrap(), before);
    assert_eq!(state_mut(&mut sd).card_mut(CARD).unwrap().peek(5), vec![0x77; 512]);
}

#[test]
fn invalid_device_numbers() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    let mut buf = vec![0u32; WORDS];
    assert_eq!(sd.init(2), Err(SdmmcError::InvalParam));
    assert_eq!(sd.deinit(2), Err(SdmmcError::InvalParam));
    assert_eq!(sd.dev_info(2), Err(SdmmcError::InvalParam));
    assert_eq!(sd.cid(7), Err(SdmmcError::InvalParam));
    assert_eq!(sd.write_prot_bits(2), 0xff);
    assert_eq!(sd.sectors(255), 0);
    assert_eq!(sd.read_sectors(2, 0, Some(&mut buf), 1), Err(SdmmcError::InvalParam));
    assert_eq!(sd.write_sectors(2, 0, Some(&buf), 1), Err(SdmmcError::InvalParam));
}
