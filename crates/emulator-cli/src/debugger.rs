//! Line-oriented single-step debugger.
//!
//! Prompts before each instruction while stepping. Register dumps and
//! memory peeks go through read-only machine accessors; in particular the
//! `x` command uses the side-effect-free walk, so inspecting memory never
//! perturbs guest-visible state.

use std::io::{self, BufRead, Write};

use pv32_core::{opcode, Console, Exit, Machine, StepOutcome};

const HELP: &str = "\
h:      print this help
q:      quit
c:      continue without further prompts
s:      single step one instruction
i:      display registers
x HEX:  display one byte at a guest virtual address (e.g. x 10000)";

enum Command {
    Continue,
    Step,
    Quit,
    Info,
    Examine(u32),
    Help,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("c") => Ok(Command::Continue),
        Some("s") | None => Ok(Command::Step),
        Some("q") => Ok(Command::Quit),
        Some("i") => Ok(Command::Info),
        Some("x") => {
            let arg = parts.next().ok_or("x needs an address")?;
            let arg = arg.trim_start_matches("0x");
            let addr =
                u32::from_str_radix(arg, 16).map_err(|_| format!("invalid address: {arg}"))?;
            Ok(Command::Examine(addr))
        }
        Some("h") => Ok(Command::Help),
        Some(other) => Err(format!("unknown command: {other}")),
    }
}

fn dump_registers(machine: &Machine) {
    println!("ra:    {:x}", machine.a());
    println!("rb:    {:x}", machine.b());
    println!("rc:    {:x}", machine.c());
    println!("sp:    {:08x}", machine.sp());
    println!("pc:    {:08x}\t[next pc]", machine.pc());
    println!("ff:    {}", machine.f());
    println!("fg:    {}", machine.g());
    println!("user:  {:x}", u32::from(machine.user()));
    println!("iena:  {:x}", u32::from(machine.iena()));
    println!("trap:  {:x}", machine.trap());
    println!("vmem:  {:x}", u32::from(machine.paging()));
    println!("ipend: {:08x}", machine.ipend());
}

fn show_next_instruction(machine: &Machine) {
    let pc = machine.pc();
    let word = match (0..4).try_fold(0u32, |acc, k| {
        machine
            .peek_byte(pc.wrapping_add(k))
            .map(|b| acc | u32::from(b) << (8 * k))
    }) {
        Some(word) => word,
        None => {
            println!("[{pc:08x}] <unmapped>");
            return;
        }
    };
    let mnemonic = opcode::name(opcode::opcode(word)).unwrap_or("???");
    println!("[{pc:08x}] {word:08x}  {mnemonic}");
}

/// Runs the machine under the debugger prompt. `c` drops to a plain run.
pub fn run(machine: &mut Machine, console: &mut dyn Console) -> Exit {
    let stdin = io::stdin();
    loop {
        print!("\ndbg => ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            // EOF on the prompt: hand the machine back to a plain run.
            return machine.run(console);
        }
        match parse_command(line.trim()) {
            Ok(Command::Continue) => return machine.run(console),
            Ok(Command::Step) => {
                show_next_instruction(machine);
                if let StepOutcome::Done(exit) = machine.step(console) {
                    return exit;
                }
            }
            Ok(Command::Quit) => std::process::exit(0),
            Ok(Command::Info) => dump_registers(machine),
            Ok(Command::Examine(addr)) => match machine.peek_byte(addr) {
                Some(byte) => println!("[{addr:08x}]: {byte:02x}"),
                None => println!("invalid address: {addr:x}"),
            },
            Ok(Command::Help) | Err(_) => println!("{HELP}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_command, Command};

    #[test]
    fn parses_the_command_set() {
        assert!(matches!(parse_command("c"), Ok(Command::Continue)));
        assert!(matches!(parse_command("s"), Ok(Command::Step)));
        assert!(matches!(parse_command(""), Ok(Command::Step)));
        assert!(matches!(parse_command("q"), Ok(Command::Quit)));
        assert!(matches!(parse_command("i"), Ok(Command::Info)));
        assert!(matches!(parse_command("h"), Ok(Command::Help)));
    }

    #[test]
    fn examine_takes_a_hex_address() {
        assert!(matches!(
            parse_command("x 10000"),
            Ok(Command::Examine(0x10000))
        ));
        assert!(matches!(
            parse_command("x 0xfff8"),
            Ok(Command::Examine(0xFFF8))
        ));
        assert!(parse_command("x").is_err());
        assert!(parse_command("x zz").is_err());
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(parse_command("w").is_err());
        assert!(parse_command("examine").is_err());
    }
}
