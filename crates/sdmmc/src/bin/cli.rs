use clap::Parser;
use fscommon::BufStream;
use sdmmc::disk::SectorStream;
use sdmmc::sim::{self, SimHost};
use sdmmc::{Action, Args, SECTOR_SIZE, Sdmmc, SdmmcError};
use std::io::{Read, Write};
use tracing::info;

/// Why the command failed, decides the exit code
enum Failure {
    Driver(SdmmcError),
    Other(Box<dyn std::error::Error>),
}

impl From<SdmmcError> for Failure {
    fn from(e: SdmmcError) -> Self {
        Failure::Driver(e)
    }
}

impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self {
        Failure::Other(e.into())
    }
}

impl From<String> for Failure {
    fn from(e: String) -> Self {
        Failure::Other(e.into())
    }
}

fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let state = match args.build_host() {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to open card image: {}", e);
            std::process::exit(2);
        }
    };
    let mut sd = sim::driver_with_config(state, args.to_driver_config());

    let exit_code = match run(&args.action, &mut sd) {
        Ok(()) => 0,
        Err(Failure::Driver(e)) => {
            eprintln!("Driver error: {}", e);
            1
        }
        Err(Failure::Other(e)) => {
            eprintln!("Error: {}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(action: &Action, sd: &mut Sdmmc<SimHost>) -> Result<(), Failure> {
    match action {
        Action::Info { dev } => {
            sd.init(*dev)?;
            let dev_info = sd.dev_info(*dev)?;
            println!("type:       {:?}", dev_info.kind);
            println!("addressing: {:?}", dev_info.addressing);
            println!(
                "capacity:   {} sectors ({} MiB)",
                dev_info.sectors,
                dev_info.sectors as u64 * SECTOR_SIZE as u64 >> 20
            );
            println!("clock:      {} Hz", dev_info.clock);
            println!("bus width:  {}-bit", dev_info.bus_width);
            println!("rca:        {:#06X}", dev_info.rca);
            println!("ccc:        {:#05X}", dev_info.ccc);
            println!("wr_prot:    {:#04X}", sd.write_prot_bits(*dev));
            let cid = dev_info.cid;
            println!(
                "cid:        {:08X}{:08X}{:08X}{:08X}",
                cid[3], cid[2], cid[1], cid[0]
            );
        }

        Action::Read {
            dev,
            sector,
            count,
            out,
        } => {
            sd.init(*dev)?;
            let mut words = vec![0u32; *count as usize * SECTOR_SIZE / 4];
            sd.read_sectors(*dev, *sector, Some(&mut words), *count)?;
            let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

            match out {
                Some(path) => {
                    std::fs::write(path, &bytes)?;
                    info!("Wrote {} bytes to {:?}", bytes.len(), path);
                }
                None => hex_dump(*sector as u64 * SECTOR_SIZE as u64, &bytes)?,
            }
        }

        Action::Write { dev, sector, input } => {
            let bytes = std::fs::read(input)?;
            let (words, count) = sector_words(bytes)
                .ok_or_else(|| format!("{:?} is larger than 65535 sectors", input))?;

            sd.init(*dev)?;
            sd.write_sectors(*dev, *sector, Some(&words), count)?;
            info!("Wrote {} sector(s) at {}", count, sector);
        }

        Action::Cat { path } => {
            sd.init(0)?;
            let stream = SectorStream::fat_partition(sd, 0)?;
            let fs = fatfs::FileSystem::new(BufStream::new(stream), fatfs::FsOptions::new())?;
            let mut file = fs.root_dir().open_file(path)?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            info!("Read {} bytes from {:?}", contents.len(), path);
            std::io::stdout().write_all(&contents)?;
        }
    }
    Ok(())
}

/// Zero-pad to whole sectors and pack into FIFO words, with the sector count
fn sector_words(mut bytes: Vec<u8>) -> Option<(Vec<u32>, u16)> {
    bytes.resize(bytes.len().div_ceil(SECTOR_SIZE).max(1) * SECTOR_SIZE, 0);
    let count = u16::try_from(bytes.len() / SECTOR_SIZE).ok()?;
    let words = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some((words, count))
}

fn hex_dump(base: u64, bytes: &[u8]) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    for (i, line) in bytes.chunks(16).enumerate() {
        write!(out, "{:08X} ", base + i as u64 * 16)?;
        for byte in line {
            write!(out, " {:02X}", byte)?;
        }
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(out, "  {}", ascii)?;
    }
    Ok(())
}
