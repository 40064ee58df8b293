use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use nrfisp::{DeviceProfile, Flashing, ReadSize, Unprotect};

#[derive(Parser)]
#[command(
    name = "nrfisp",
    about = "Read and flash nRF24LU1+ dongles through their USB bootloader"
)]
struct Cli {
    /// Device profile YAML overriding the built-in USB ids, endpoints and timeouts
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Log every USB frame
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bootloader version
    Version {},
    /// Read flash to a .hex or .bin file
    Read {
        /// Amount of flash to read in KiB, 16 or 32
        #[arg(short, long, default_value_t = 32)]
        size: u32,
        /// Also hex dump the content read
        #[arg(long)]
        dump: bool,
        path: PathBuf,
    },
    /// Remove STP protection, write a .hex/.bin/.elf file and reset
    Write {
        path: PathBuf,
        /// Remove STP protection without asking
        #[arg(short, long)]
        yes: bool,
        /// Read flash back and compare before resetting
        #[arg(long)]
        verify: bool,
    },
    /// Disable the FSR.STP protection bit
    Unprotect {
        #[arg(short, long)]
        yes: bool,
    },
    /// Enable the FSR.STP protection bit
    Protect {},
    /// Turn on flash MainBlock readback disable
    ReadDisable {},
    /// Erase one 512-byte page
    Erase { page: u32 },
    /// Reset the dongle
    Reset {},
}

fn confirm_unprotect(yes: bool) -> impl FnOnce() -> bool {
    move || {
        yes || dialoguer::Confirm::new()
            .with_prompt("STP protection is ON! Disable protection?")
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = simplelog::TermLogger::init(
        if cli.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let profile = match &cli.profile {
        Some(path) => DeviceProfile::from_file(path)?,
        None => DeviceProfile::builtin()?,
    };

    // Inputs are validated before the device is opened.
    let open = || -> Result<_> { Ok(Flashing::new_from_usb(&profile)?.with_progress(true)) };
    match cli.command {
        Commands::Version {} => {
            log::info!("Bootloader version: {}", open()?.version()?);
        }
        Commands::Read { size, dump, path } => {
            let size = ReadSize::try_from(size)?;
            let image = open()?.read_region(size)?;
            if dump {
                println!("{}", nrfisp::format::dump(&image)?);
            }
            nrfisp::format::write_image_to_file(&path, &image)?;
        }
        Commands::Write { path, yes, verify } => {
            let image = nrfisp::format::read_image_from_file(&path)?;
            log::info!("Firmware size: {} bytes", image.len());
            let report = open()?.write_image(&image, verify, confirm_unprotect(yes))?;
            log::info!("Done, {} pages written", report.written_pages.len());
        }
        Commands::Unprotect { yes } => match open()?.unprotect(confirm_unprotect(yes))? {
            Unprotect::Declined => log::warn!("STP protection left ON"),
            _ => log::info!("Done"),
        },
        Commands::Protect {} => open()?.stp_on()?,
        Commands::ReadDisable {} => open()?.read_disable()?,
        Commands::Erase { page } => open()?.erase_page(page)?,
        Commands::Reset {} => open()?.reset()?,
    }

    Ok(())
}
