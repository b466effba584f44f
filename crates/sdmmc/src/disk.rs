//! Byte stream view of an initialized device, for file system crates.
//!
//! Partitions are [`fscommon::StreamSlice`] windows onto the device stream.

use crate::card::words_to_bytes;
use crate::driver::Sdmmc;
use crate::error::SdmmcError;
use crate::host::Controller;
use fscommon::StreamSlice;
use sdmmc_hw::protocol::SECTOR_SIZE;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

const WORDS: usize = SECTOR_SIZE / 4;

/// MBR partition types carrying a FAT file system
const FAT_PARTITION_TYPES: [u8; 6] = [0x01, 0x04, 0x06, 0x0b, 0x0c, 0x0e];

/// Seekable byte stream over a whole device.
///
/// Unaligned accesses read the whole sector first; writes are read-modify-write.
pub struct SectorStream<'a, C> {
    sd: &'a mut Sdmmc<C>,
    dev: u8,
    sectors: u32,
    pos: u64,
}

/// Window onto one partition of a device
pub type Partition<'a, C> = StreamSlice<SectorStream<'a, C>>;

impl<'a, C: Controller> SectorStream<'a, C> {
    pub fn new(sd: &'a mut Sdmmc<C>, dev: u8) -> Self {
        let sectors = sd.sectors(dev);
        Self {
            sd,
            dev,
            sectors,
            pos: 0,
        }
    }

    /// First FAT partition of an MBR, or the whole device when sector 0 holds no partition table
    pub fn fat_partition(sd: &'a mut Sdmmc<C>, dev: u8) -> io::Result<Partition<'a, C>> {
        let mut stream = Self::new(sd, dev);
        let len = stream.len();
        let mut mbr = [0u8; SECTOR_SIZE];
        stream.load(0, &mut mbr)?;

        if mbr[510..512] != [0x55, 0xaa] {
            return StreamSlice::new(stream, 0, len);
        }
        for entry in mbr[0x1be..0x1fe].chunks_exact(16) {
            let kind = entry[4];
            let first = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
            let count = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);
            if FAT_PARTITION_TYPES.contains(&kind) && first != 0 && first < stream.sectors {
                debug!(
                    "FAT partition type {:#04X} at sector {}, {} sectors",
                    kind, first, count
                );
                let start = first as u64 * SECTOR_SIZE as u64;
                let end = (start + count as u64 * SECTOR_SIZE as u64).min(len);
                return StreamSlice::new(stream, start, end);
            }
        }
        // A FAT boot sector also ends in 55 AA
        StreamSlice::new(stream, 0, len)
    }

    fn len(&self) -> u64 {
        self.sectors as u64 * SECTOR_SIZE as u64
    }

    fn load(&mut self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        let mut words = [0u32; WORDS];
        self.sd
            .read_sectors(self.dev, sector, Some(&mut words), 1)
            .map_err(to_io)?;
        words_to_bytes(&words, out);
        Ok(())
    }

    fn store(&mut self, sector: u32, data: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        let mut words = [0u32; WORDS];
        for (word, chunk) in words.iter_mut().zip(data.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.sd
            .write_sectors(self.dev, sector, Some(&words), 1)
            .map_err(to_io)
    }
}

fn to_io(e: SdmmcError) -> io::Error {
    io::Error::other(e)
}

impl<C: Controller> Read for SectorStream<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len() || buf.is_empty() {
            return Ok(0);
        }
        let sector = (self.pos / SECTOR_SIZE as u64) as u32;
        let offset = (self.pos % SECTOR_SIZE as u64) as usize;
        let mut data = [0u8; SECTOR_SIZE];
        self.load(sector, &mut data)?;

        let n = buf.len().min(SECTOR_SIZE - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<C: Controller> Write for SectorStream<'_, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.pos >= self.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "end of device"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let sector = (self.pos / SECTOR_SIZE as u64) as u32;
        let offset = (self.pos % SECTOR_SIZE as u64) as usize;
        let n = buf.len().min(SECTOR_SIZE - offset);

        let mut data = [0u8; SECTOR_SIZE];
        if n < SECTOR_SIZE {
            self.load(sector, &mut data)?;
        }
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        self.store(sector, &data)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Controller> Seek for SectorStream<'_, C> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of device")
        })?;
        Ok(self.pos)
    }
}
