use basefw::mock::MockBase;
use basefw::{DeviceLocator, FirmwareImage, Section, Updater, UpdaterConfig};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("usb: {0}")]
    Usb(#[from] rusb::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Firmware(#[from] basefw::Error),
}

fn main() {
    pretty_env_logger::init();

    let args = Opt::from_args();

    let ok = match run(args) {
        Ok(ok) => ok,
        Err(e) => {
            log::error!("{}", e);
            false
        }
    };

    std::process::exit(if ok { 0 } else { 1 });
}

fn run(args: Opt) -> Result<bool, CliError> {
    let locator = match (args.vid, args.pid) {
        (Some(v), Some(p)) => Some(DeviceLocator::new(v, p).at(args.bus, args.port)),
        _ => None,
    };

    match args.cmd {
        Cmd::list => list(locator),
        Cmd::info { file } => info(file),
        Cmd::simulate(sim) => simulate(sim, locator.unwrap_or_default()),
    }
}

/// Prints the attached devices that look like a base.
fn list(locator: Option<DeviceLocator>) -> Result<bool, CliError> {
    let vendor = vendor_map();
    let mut found = false;

    for device in rusb::devices()?.iter() {
        let descriptor = device.device_descriptor()?;
        let (vid, pid) = (descriptor.vendor_id(), descriptor.product_id());
        let (bus, port) = (device.bus_number(), device.port_number());

        let wanted = match &locator {
            Some(locator) => locator.matches(vid, pid, bus, port),
            None => vendor
                .get(&vid)
                .map_or(false, |products| products.contains(&pid)),
        };
        if wanted {
            println!("bus {:03} port {:03} {:04x}:{:04x}", bus, port, vid, pid);
            found = true;
        }
    }

    if !found {
        println!("no base found, is it attached?");
    }
    Ok(found)
}

fn info(file: PathBuf) -> Result<bool, CliError> {
    let data = std::fs::read(file)?;
    let image = FirmwareImage::parse(&data)?;

    println!("board {}", image.board().unwrap_or("unknown"));
    for section in [Section::Ro, Section::Rw].iter() {
        println!(
            "{} {} {} bytes crc32 {:08x}",
            section,
            image.version(*section),
            image.section(*section).len(),
            image.checksum(*section)
        );
    }
    Ok(true)
}

/// Runs the full update against an in-memory base.
fn simulate(sim: Simulate, locator: DeviceLocator) -> Result<bool, CliError> {
    let data = std::fs::read(&sim.file)?;

    let (board, ro, rw) = match FirmwareImage::parse(&data) {
        Ok(image) => (
            image.board().unwrap_or("unknown").to_string(),
            image.version(Section::Ro).to_string(),
            image.version(Section::Rw).to_string(),
        ),
        Err(e) => {
            log::warn!("{}", e);
            ("unknown".into(), "unknown".into(), "unknown".into())
        }
    };

    let mut base = MockBase::new(
        sim.board.as_deref().unwrap_or(&board),
        sim.ro.as_deref().unwrap_or(&ro),
        sim.rw.as_deref().unwrap_or(&rw),
    )
    .running(sim.active)
    .plugged_at(&locator);
    if sim.paired {
        base = base.paired();
    }
    base.fail_next_opens(sim.drop);

    let config = UpdaterConfig {
        locator,
        max_lost_connections: sim.retries,
        backoff: Duration::from_millis(sim.backoff_ms),
        ..UpdaterConfig::default()
    };
    let ok = Updater::new(data, base.clone(), base.clone(), config).run();

    println!("{}", if ok { "Success" } else { "Failed" });
    println!(
        "base runs {} RO {} RW {} paired {}",
        base.active(),
        base.version(Section::Ro),
        base.version(Section::Rw),
        base.has_key()
    );
    println!("{:?}", base.counters());
    Ok(ok)
}

/// Known detachable bases by vendor id.
fn vendor_map() -> std::collections::HashMap<u16, Vec<u16>> {
    maplit::hashmap! {
        0x18d1 => vec![0x5022, 0x502b, 0x5030],
    }
}

fn parse_hex_16(input: &str) -> Result<u16, std::num::ParseIntError> {
    match input.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse::<u16>(),
    }
}

#[derive(StructOpt, Debug, PartialEq)]
pub struct Simulate {
    /// image to flash
    #[structopt(short = "f", name = "file", long = "file", parse(from_os_str))]
    file: PathBuf,
    /// RO version on the base, defaults to the image's
    #[structopt(long = "ro")]
    ro: Option<String>,
    /// RW version on the base, defaults to the image's
    #[structopt(long = "rw")]
    rw: Option<String>,
    /// section the base runs
    #[structopt(long = "active", default_value = "ro")]
    active: Section,
    /// base already holds a pairing key
    #[structopt(long = "paired")]
    paired: bool,
    /// board the base reports, defaults to the image's
    #[structopt(long = "board")]
    board: Option<String>,
    /// number of connection attempts that fail before the base shows up
    #[structopt(long = "drop", default_value = "0")]
    drop: u32,
    /// consecutive lost connections tolerated
    #[structopt(long = "retries", default_value = "5")]
    retries: u32,
    #[structopt(long = "backoff-ms", default_value = "500")]
    backoff_ms: u64,
}

#[allow(non_camel_case_types)]
#[derive(StructOpt, Debug, PartialEq)]
pub enum Cmd {
    /// list attached bases with their bus and port
    list,
    /// print board, versions and checksums of an image
    info {
        #[structopt(short = "f", name = "file", long = "file", parse(from_os_str))]
        file: PathBuf,
    },
    /// dry run an update against a simulated base
    simulate(Simulate),
}

#[derive(Debug, StructOpt)]
#[structopt(name = "basefw", about = "Detachable keyboard base firmware updater")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Cmd,

    #[structopt(short = "p", name = "pid", long = "pid", parse(try_from_str = parse_hex_16))]
    pid: Option<u16>,
    #[structopt(short = "v", name = "vid", long = "vid", parse(try_from_str = parse_hex_16))]
    vid: Option<u16>,
    /// usb bus the base sits on
    #[structopt(short = "b", long = "bus")]
    bus: Option<u8>,
    /// usb port the base sits on
    #[structopt(long = "port")]
    port: Option<u8>,
}
