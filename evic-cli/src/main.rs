use colored::*;
use evic::dataflash::DataFlash;
use evic::aprom;
use evic::image::{self, FirmwareImage};
use evic::{Error, Programmer, UploadOptions};
use hidapi::{HidApi, HidDevice};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use structopt::StructOpt;

fn main() {
    pretty_env_logger::init();

    let args = Opt::from_args();

    if let Err(e) = run(args) {
        match e.downcast_ref::<Error>() {
            Some(Error::Aborted { region, offset }) => eprintln!(
                "{} stopped before {} offset {:#x}, device handle closed",
                "Aborted:".yellow().bold(),
                region,
                offset
            ),
            _ => eprintln!("{} {}", "error:".red().bold(), e),
        }
        std::process::exit(1);
    }
}

fn run(args: Opt) -> Result<(), Box<dyn std::error::Error>> {
    match args.cmd {
        Cmd::convert { input, output, raw } => convert(input, output, raw),
        Cmd::upload {
            input,
            unencrypted,
            dataflash,
            no_verify_aprom,
            no_verify_dataflash,
            no_firmware_check,
        } => {
            let firmware = read_firmware(input, unencrypted)?;
            let dataflash = dataflash.map(read_dataflash).transpose()?;
            let options = UploadOptions {
                verify_aprom: !no_verify_aprom,
                verify_data_flash: !no_verify_dataflash,
                check_firmware: !no_firmware_check,
            };

            let mut programmer = connect(args.vid, args.pid, options)?;
            println!(
                "    {} APROM, {} bytes",
                "Uploading".green().bold(),
                firmware.len()
            );
            programmer.upload(&firmware, dataflash.as_deref())?;
            println!("    {} firmware upload complete", "Finished".green().bold());
            Ok(())
        }
        Cmd::dump_dataflash { output } => {
            let mut programmer = connect(args.vid, args.pid, UploadOptions::default())?;
            let data = programmer.dump_data_flash(None)?;
            fs::write(&output, &data)?;
            println!(
                "    {} {} bytes of data flash to {:?}",
                "Dumped".green().bold(),
                data.len(),
                output
            );
            Ok(())
        }
        Cmd::info => {
            let mut programmer = connect(args.vid, args.pid, UploadOptions::default())?;
            let data = programmer.dump_data_flash(None)?;
            if let Ok(dataflash) = DataFlash::new(data) {
                println!(
                    "\tBoot flag: {:?}\n\tLDROM version: {}",
                    dataflash.bootflag(),
                    dataflash.ldrom_version()
                );
                if let Err(e) = dataflash.verify() {
                    println!("\t{} data flash {}", "Warning:".yellow().bold(), e);
                }
            }
            Ok(())
        }
    }
}

/// Opens and identifies the device, printing what was found. Ctrl-C stops the
/// session at the next chunk boundary.
fn connect(
    vid: Option<u16>,
    pid: Option<u16>,
    options: UploadOptions,
) -> Result<Programmer<'static, HidDevice>, Box<dyn std::error::Error>> {
    let api = HidApi::new()?;

    let mut programmer = Programmer::new(options);
    let abort = programmer.abort_handle();
    ctrlc::set_handler(move || {
        log::warn!("interrupted, stopping at the next chunk");
        abort.store(true, Ordering::SeqCst);
    })?;

    programmer.connect(|| evic::open(&api, vid, pid))?;
    let model = programmer.identify()?;

    println!("\n{}", "Found device:".green().bold());
    println!("\tDevice name: {}", model.name);
    if let Some(identity) = programmer.identity() {
        println!("\tProduct id: {}", identity.product_id);
        println!(
            "\tFirmware version: {:.2}",
            f64::from(identity.fw_version) / 100.0
        );
        println!(
            "\tHardware version: {:.2}\n",
            f64::from(identity.hw_version) / 100.0
        );
    }

    Ok(programmer)
}

fn convert(input: PathBuf, output: PathBuf, raw: bool) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(&input)?;

    let converted = if raw {
        log::debug!("raw conversion of {} bytes", data.len());
        image::convert(&data)
    } else if image::is_encoded(&data) {
        image::decode(&data)?.into_bytes()
    } else if aprom::is_plaintext(&data) {
        image::encode(&FirmwareImage::from_plaintext(data))?.into_bytes()
    } else {
        eprintln!(
            "{} {:?} has no header and no APROM marker, decrypting it as a vendor image",
            "Warning:".yellow().bold(),
            input
        );
        image::convert(&data)
    };

    fs::write(&output, converted)?;
    println!(
        "    {} {:?} to {:?}",
        "Converted".green().bold(),
        input,
        output
    );
    Ok(())
}

/// Loads an upload image. Encrypted images are either our container or a
/// headerless vendor image.
fn read_firmware(input: PathBuf, unencrypted: bool) -> Result<FirmwareImage, Error> {
    let data = fs::read(&input).map_err(|e| Error::Format(format!("{:?}: {}", input, e)))?;

    if unencrypted {
        Ok(FirmwareImage::from_plaintext(data))
    } else if image::is_encoded(&data) {
        image::decode(&data)
    } else {
        Ok(FirmwareImage::from_plaintext(image::convert(&data)))
    }
}

fn read_dataflash(path: PathBuf) -> Result<Vec<u8>, Error> {
    let data = fs::read(&path).map_err(|e| Error::Format(format!("{:?}: {}", path, e)))?;

    let dataflash = DataFlash::new(data)?;
    dataflash.verify()?;

    Ok(dataflash.into_bytes())
}

fn parse_hex_16(input: &str) -> Result<u16, std::num::ParseIntError> {
    if input.starts_with("0x") {
        u16::from_str_radix(&input[2..], 16)
    } else {
        input.parse::<u16>()
    }
}

#[allow(non_camel_case_types)]
#[derive(StructOpt, Debug, PartialEq)]
pub enum Cmd {
    /// Encrypt or decrypt a firmware image. Plaintext is encoded, encoded and
    /// vendor images are decrypted
    convert {
        #[structopt(parse(from_os_str))]
        input: PathBuf,
        #[structopt(short = "o", long = "output", parse(from_os_str))]
        output: PathBuf,
        /// Headerless vendor image. The transform is its own inverse.
        #[structopt(short = "r", long = "raw")]
        raw: bool,
    },

    /// Write firmware from INPUT into the device
    upload {
        #[structopt(parse(from_os_str))]
        input: PathBuf,
        /// Use an unencrypted firmware image
        #[structopt(short = "u", long = "unencrypted")]
        unencrypted: bool,
        /// Write this data flash file as well
        #[structopt(short = "d", long = "dataflash", parse(from_os_str))]
        dataflash: Option<PathBuf>,
        /// Skip reading back APROM after writing it
        #[structopt(long = "no-verify-aprom")]
        no_verify_aprom: bool,
        /// Skip reading back data flash after writing it
        #[structopt(long = "no-verify-dataflash")]
        no_verify_dataflash: bool,
        /// Upload even if the image does not name this device
        #[structopt(long = "no-firmware-check")]
        no_firmware_check: bool,
    },

    /// Dump data flash to OUTPUT
    #[structopt(name = "dump-dataflash")]
    dump_dataflash {
        #[structopt(short = "o", long = "output", parse(from_os_str))]
        output: PathBuf,
    },

    /// Show device information
    info,
}

#[derive(Debug, StructOpt)]
#[structopt(name = "evic", about = "Joyetech Evic firmware tool")]
struct Opt {
    #[structopt(subcommand)]
    cmd: Cmd,

    #[structopt(short = "p", name = "pid", long = "pid", parse(try_from_str = parse_hex_16))]
    pid: Option<u16>,
    #[structopt(short = "v", name = "vid", long = "vid", parse(try_from_str = parse_hex_16))]
    vid: Option<u16>,
}
