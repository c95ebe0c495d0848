//! CLI driver for the PV32 emulator.
//!
//! Loads an executable image (and optionally a RAM filesystem blob) into a
//! fresh machine and runs it against the host console. Setup failures
//! print one line on stderr and exit with -1; anything after a successful
//! setup is the guest's business.

mod console;
mod debugger;
mod logger;

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use log::{debug, error, info};
use pv32_core::{Exit, Machine, DEFAULT_MEM_BYTES};

use crate::console::StdioConsole;

const HELP_TEXT: &str = "Usage: pv32-emu [-v] [-m megabytes] [-f filesystem] [-g] image";

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    image: PathBuf,
    mem_bytes: u32,
    filesystem: Option<PathBuf>,
    verbose: bool,
    debug: bool,
}

#[derive(Debug)]
enum ParseResult {
    Args(CliArgs),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let mut image: Option<PathBuf> = None;
    let mut mem_bytes = DEFAULT_MEM_BYTES;
    let mut filesystem: Option<PathBuf> = None;
    let mut verbose = false;
    let mut debug = false;

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Ok(ParseResult::Help);
        }

        if arg == "-v" {
            verbose = true;
            continue;
        }

        if arg == "-g" {
            debug = true;
            continue;
        }

        if arg == "-m" {
            let value = args
                .next()
                .ok_or_else(|| String::from("missing value for -m"))?;
            let megabytes: u32 = value
                .to_string_lossy()
                .parse()
                .map_err(|_| format!("bad memory size: {}", value.to_string_lossy()))?;
            mem_bytes = megabytes
                .checked_mul(1024 * 1024)
                .ok_or_else(|| format!("memory size too large: {megabytes}M"))?;
            continue;
        }

        if arg == "-f" {
            let value = args
                .next()
                .ok_or_else(|| String::from("missing value for -f"))?;
            filesystem = Some(PathBuf::from(value));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if image.is_some() {
            return Err(String::from("multiple image paths provided"));
        }
        image = Some(PathBuf::from(arg));
    }

    let image = image.ok_or_else(|| String::from("missing image path"))?;
    Ok(ParseResult::Args(CliArgs {
        image,
        mem_bytes,
        filesystem,
        verbose,
        debug,
    }))
}

fn setup(args: &CliArgs) -> Result<Machine, String> {
    let mut machine = Machine::new(args.mem_bytes);
    debug!("mem size = {}", args.mem_bytes);

    if let Some(path) = &args.filesystem {
        debug!("loading ram filesystem {}", path.display());
        let blob = fs::read(path)
            .map_err(|err| format!("couldn't read filesystem {}: {err}", path.display()))?;
        machine
            .load_filesystem(&blob)
            .map_err(|err| err.to_string())?;
    }

    let bytes = fs::read(&args.image)
        .map_err(|err| format!("couldn't read {}: {err}", args.image.display()))?;
    machine.load_image(&bytes).map_err(|err| err.to_string())?;
    debug!("emulating {}", args.image.display());
    Ok(machine)
}

fn main() -> ExitCode {
    let args = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{HELP_TEXT}");
            return ExitCode::SUCCESS;
        }
        Ok(ParseResult::Args(args)) => args,
        Err(error) => {
            eprintln!("pv32-emu: {error}");
            eprintln!("{HELP_TEXT}");
            return ExitCode::from(255);
        }
    };

    logger::install(args.verbose);

    let mut machine = match setup(&args) {
        Ok(machine) => machine,
        Err(message) => {
            error!("{message}");
            return ExitCode::from(255);
        }
    };

    let mut console = StdioConsole::new();
    let exit = if args.debug {
        info!("entering debugger");
        debugger::run(&mut machine, &mut console)
    } else {
        machine.run(&mut console)
    };

    match exit {
        Exit::Halt { code } => {
            debug!("halt({code}), cycle = {}", machine.cycle());
            ExitCode::SUCCESS
        }
        Exit::Escape => {
            info!("ungraceful exit, cycle = {}", machine.cycle());
            ExitCode::SUCCESS
        }
        Exit::BadWrite { fd } => {
            error!("guest wrote to unsupported descriptor {fd}");
            ExitCode::from(2)
        }
        Exit::Fatal(dump) => {
            error!("machine fault: {dump}");
            ExitCode::from(2)
        }
    }
}
