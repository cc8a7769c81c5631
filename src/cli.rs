//! Command-line front end for `ccprobe`.
//!
//! `-x/--hex` implies an erase first; `-v/--verify` requires `-x`. Every
//! flag composes: `ccprobe -e -x firmware.hex -v -i` erases, programs,
//! verifies, and finally prints target identification, in that order.

use std::fs;
use std::process;

use log::LevelFilter;
use simplelog::{Config as LogConfig, TermLogger, TerminalMode};
use structopt::StructOpt;

use ccprobe::engine::ProgrammingEngine;
use ccprobe::error::{Error, Result};
use ccprobe::hex;
use ccprobe::probe::{self, Probe, CONFIG_SOFT_POWER_MODE, CONFIG_TIMER_SUSPEND};
use ccprobe::target::Target;
use ccprobe::transport::{UsbTransport, PRODUCT_ID, VENDOR_ID};

#[derive(Debug, StructOpt)]
#[structopt(name = "ccprobe", about = "Host-side programmer for CC-Debugger probes")]
struct Options {
    /// Print target chip identification and flash/SRAM geometry.
    #[structopt(short = "i", long = "info")]
    info: bool,

    /// Erase the target's flash before any other operation.
    #[structopt(short = "e", long = "erase")]
    erase: bool,

    /// Program the target from an Intel-HEX file. Implies --erase.
    #[structopt(short = "x", long = "hex", parse(from_os_str))]
    hex_file: Option<std::path::PathBuf>,

    /// Verify flash contents after programming. Requires --hex.
    #[structopt(short = "v", long = "verify")]
    verify: bool,

    /// Use the slower, more reliable debug clock.
    #[structopt(short = "s", long = "slow")]
    slow: bool,

    /// Enable verbose (debug-level) logging.
    #[structopt(short = "V", long = "verbose")]
    verbose: bool,
}

fn main() {
    let options = Options::from_args();

    let level = if options.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let _ = TermLogger::init(level, LogConfig::default(), TerminalMode::Mixed);

    if let Err(e) = run(options) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(options: Options) -> Result<()> {
    if options.verify && options.hex_file.is_none() {
        return Err(Error::HexFormat("--verify requires --hex".into()));
    }

    let image = options
        .hex_file
        .as_ref()
        .map(|path| {
            let text = fs::read_to_string(path)
                .map_err(|e| Error::HexFormat(format!("reading {}: {}", path.display(), e)))?;
            hex::parse(&text)
        })
        .transpose()?;

    let mut transport = UsbTransport::open(VENDOR_ID, PRODUCT_ID)?;

    {
        let mut the_probe = Probe::new(&mut transport);
        let fw_info = the_probe.fw_info()?;
        println!("firmware: chip=0x{:04x} id={} rev={}", fw_info.chip, fw_info.fw_id, fw_info.fw_rev);
        if !fw_info.has_target() {
            return Err(Error::DeviceNotFound);
        }

        the_probe.prepare_enter_debug(options.slow)?;
    }

    {
        let mut t = Target::new(&mut transport);
        let _config = t.read_config()?;
        t.write_config(CONFIG_TIMER_SUSPEND | CONFIG_SOFT_POWER_MODE)?;
        let status = t.read_status()?;
        probe::check_not_locked(status)?;
    }

    let result = drive(&mut transport, &options, image.as_ref());

    {
        let mut the_probe = Probe::new(&mut transport);
        the_probe.leave_debug()?;
    }

    result
}

fn drive(transport: &mut UsbTransport, options: &Options, image: Option<&hex::HexImage>) -> Result<()> {
    let mut engine = ProgrammingEngine::new(Target::new(transport));

    let should_erase = options.erase || image.is_some();
    if should_erase {
        engine.erase()?;
    }

    if let Some(image) = image {
        let base = image.base_address().unwrap_or(0);
        let bytes = image.to_padded_bytes().unwrap_or_default();
        engine.write_flash(base, &bytes)?;

        if options.verify {
            engine.verify_flash(base, &bytes)?;
            println!("verify OK ({} bytes at 0x{:04x})", bytes.len(), base);
        }
    }

    if options.info {
        let info = engine.target_info()?;
        println!(
            "chip_id=0x{:02x} chip_version=0x{:02x} flash={}KiB sram={}KiB",
            info.chip_id, info.chip_version, info.flash_kib, info.sram_kib
        );
    }

    Ok(())
}
