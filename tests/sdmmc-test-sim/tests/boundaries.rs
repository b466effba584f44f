use sdmmc::sim::SimCard;
use sdmmc::{Addressing, CardKind, SdmmcError};
use sdmmc_hw::protocol::cmd;
use sim_test_helpers::*;

#[test]
fn first_and_last_sector() {
    let mut sd = ready_card(SimCard::sdhc(4096));
    let last = sd.sectors(CARD) - 1;
    assert_eq!(last, 4095);

    for sector in [0, last] {
        let data = pattern(sector, 1);
        sd.write_sectors(CARD, sector, Some(&data), 1).unwrap();
        let mut back = vec![0u32; WORDS];
        sd.read_sectors(CARD, sector, Some(&mut back), 1).unwrap();
        assert_eq!(back, data);
    }

    let mut buf = vec![0u32; 2 * WORDS];
    assert_eq!(
        sd.read_sectors(CARD, last, Some(&mut buf), 2),
        Err(SdmmcError::InvalParam)
    );
    let data = pattern(last, 2);
    assert_eq!(
        sd.write_sectors(CARD, last, Some(&data), 2),
        Err(SdmmcError::InvalParam)
    );
}

#[test]
fn multi_block_run_ending_on_the_last_sector() {
    let mut sd = ready_emmc(SimCard::emmc(1 << 16));
    let last = sd.sectors(EMMC) - 1;
    let data = pattern(last - 7, 8);
    sd.write_sectors(EMMC, last - 7, Some(&data), 8).unwrap();
    let mut back = vec![0u32; data.len()];
    sd.read_sectors(EMMC, last - 7, Some(&mut back), 8).unwrap();
    assert_eq!(back, data);
}

#[test]
fn byte_addressed_card_stops_at_2gib() {
    // 4 GiB standard capacity card (READ_BL_LEN 2048)
    let mut sd = ready_card(SimCard::sdsc(8 << 20));
    let info = sd.dev_info(CARD).unwrap();
    assert_eq!(info.kind, CardKind::Sdsc);
    assert_eq!(info.addressing, Addressing::Byte);
    assert_eq!(info.sectors, 8 << 20);

    let below = (4 << 20) - 1;
    let data = pattern(below, 2);
    sd.write_sectors(CARD, below, Some(&data[..WORDS]), 1).unwrap();
    let mut buf = vec![0u32; 2 * WORDS];
    sd.read_sectors(CARD, below, Some(&mut buf[..WORDS]), 1).unwrap();
    assert_eq!(buf[..WORDS], data[..WORDS]);

    clear_history(&mut sd);
    assert_eq!(
        sd.read_sectors(CARD, below, Some(&mut buf), 2),
        Err(SdmmcError::InvalParam)
    );
    assert_eq!(
        sd.write_sectors(CARD, below, Some(&data), 2),
        Err(SdmmcError::InvalParam)
    );
    assert_eq!(
        sd.read_sectors(CARD, 4 << 20, Some(&mut buf[..WORDS]), 1),
        Err(SdmmcError::InvalParam)
    );
    assert!(history(&sd).is_empty());
}

#[test]
fn byte_addressed_card_gets_byte_offsets() {
    let mut sd = ready_card(SimCard::legacy_mmc(1 << 16));
    clear_history(&mut sd);
    let mut buf = vec![0u32; WORDS];
    sd.read_sectors(CARD, 3, Some(&mut buf), 1).unwrap();
    let read = history(&sd)
        .into_iter()
        .find(|c| c.index == cmd::READ_SINGLE_BLOCK)
        .unwrap();
    assert_eq!(read.arg, 3 * 512);
}

#[test]
fn block_addressed_card_gets_sector_numbers() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    clear_history(&mut sd);
    let mut buf = vec![0u32; WORDS];
    sd.read_sectors(CARD, 3, Some(&mut buf), 1).unwrap();
    let read = history(&sd)
        .into_iter()
        .find(|c| c.index == cmd::READ_SINGLE_BLOCK)
        .unwrap();
    assert_eq!(read.arg, 3);
}

#[test]
fn largest_transfer_count() {
    let mut sd = ready_card(SimCard::sdhc(1 << 17));
    let count = u16::MAX;
    let data = pattern(17, count as usize);
    sd.write_sectors(CARD, 17, Some(&data), count).unwrap();

    // Back through the DMA path
    sd.read_sectors(CARD, 17, None, count).unwrap();
    assert_eq!(state(&sd).dma_window(), &to_bytes(&data)[..]);

    let card = state_mut(&mut sd).card_mut(CARD).unwrap();
    assert_eq!(card.peek(17 + count as u64 - 1), to_bytes(&pattern(17 + count as u32 - 1, 1)));
    assert_eq!(card.peek(17 + count as u64), vec![0; 512]);
}

#[test]
fn dma_and_cpu_buffers_move_the_same_bytes() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    let data = pattern(64, 4);

    // Write through DMA, read back into a CPU buffer
    *state_mut(&mut sd).dma_window_mut() = to_bytes(&data);
    sd.write_sectors(CARD, 64, None, 4).unwrap();
    let mut back = vec![0u32; data.len()];
    sd.read_sectors(CARD, 64, Some(&mut back), 4).unwrap();
    assert_eq!(back, data);

    // Write from a CPU buffer, read back through DMA
    let data = pattern(200, 1);
    sd.write_sectors(CARD, 200, Some(&data), 1).unwrap();
    sd.read_sectors(CARD, 200, None, 1).unwrap();
    assert_eq!(state(&sd).dma_window(), &to_bytes(&data)[..]);
}

#[test]
fn buffer_must_hold_every_sector() {
    let mut sd = ready_card(SimCard::sdhc(1 << 20));
    clear_history(&mut sd);
    let mut short = vec![0u32; 2 * WORDS - 1];
    assert_eq!(
        sd.read_sectors(CARD, 0, Some(&mut short), 2),
        Err(SdmmcError::InvalParam)
    );
    assert_eq!(
        sd.write_sectors(CARD, 0, Some(&short), 2),
        Err(SdmmcError::InvalParam)
    );
    assert!(history(&sd).is_empty());

    // Larger buffers are fine, only the leading sectors move
    let mut long = vec![0xdead_beef_u32; 3 * WORDS];
    sd.read_sectors(CARD, 0, Some(&mut long), 2).unwrap();
    assert_eq!(long[..2 * WORDS], vec![0u32; 2 * WORDS][..]);
    assert_eq!(long[2 * WORDS], 0xdead_beef);
}
