//! Command-line front end: loads a ROM and disk images, then drives the emulator in a loop,
//! reading console bytes from stdin and writing them to stdout.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use wbw_emu::cpu::{CpuMode, StepOutcome, Z80Core};
use wbw_emu::driver::BatchOutcome;
use wbw_emu::memory::Memory;
use wbw_emu::Emulator;

#[derive(Debug, StructOpt)]
#[structopt(name = "wbw-emu", about = "An emulator for a RomWBW-based Z80 single-board computer")]
struct Opt {
    /// Path to the RomWBW ROM image.
    #[structopt(long, parse(from_os_str))]
    romwbw: PathBuf,

    /// Disk images for units 0-15, given as `--hbdisk0 path.img` through `--hbdisk15 path.img`.
    #[structopt(long = "hbdisk0", parse(from_os_str))]
    hbdisk0: Option<PathBuf>,
    #[structopt(long = "hbdisk1", parse(from_os_str))]
    hbdisk1: Option<PathBuf>,
    #[structopt(long = "hbdisk2", parse(from_os_str))]
    hbdisk2: Option<PathBuf>,
    #[structopt(long = "hbdisk3", parse(from_os_str))]
    hbdisk3: Option<PathBuf>,
    #[structopt(long = "hbdisk4", parse(from_os_str))]
    hbdisk4: Option<PathBuf>,
    #[structopt(long = "hbdisk5", parse(from_os_str))]
    hbdisk5: Option<PathBuf>,
    #[structopt(long = "hbdisk6", parse(from_os_str))]
    hbdisk6: Option<PathBuf>,
    #[structopt(long = "hbdisk7", parse(from_os_str))]
    hbdisk7: Option<PathBuf>,
    #[structopt(long = "hbdisk8", parse(from_os_str))]
    hbdisk8: Option<PathBuf>,
    #[structopt(long = "hbdisk9", parse(from_os_str))]
    hbdisk9: Option<PathBuf>,
    #[structopt(long = "hbdisk10", parse(from_os_str))]
    hbdisk10: Option<PathBuf>,
    #[structopt(long = "hbdisk11", parse(from_os_str))]
    hbdisk11: Option<PathBuf>,
    #[structopt(long = "hbdisk12", parse(from_os_str))]
    hbdisk12: Option<PathBuf>,
    #[structopt(long = "hbdisk13", parse(from_os_str))]
    hbdisk13: Option<PathBuf>,
    #[structopt(long = "hbdisk14", parse(from_os_str))]
    hbdisk14: Option<PathBuf>,
    #[structopt(long = "hbdisk15", parse(from_os_str))]
    hbdisk15: Option<PathBuf>,

    /// Aliases for `--hbdisk0`/`--hbdisk1`, matching RomWBW's own boot-disk terminology.
    #[structopt(long = "disk0", parse(from_os_str), conflicts_with = "hbdisk0")]
    disk0: Option<PathBuf>,
    #[structopt(long = "disk1", parse(from_os_str), conflicts_with = "hbdisk1")]
    disk1: Option<PathBuf>,

    /// Bytes to pre-queue into the console input before the first step, with a trailing CR
    /// appended.
    #[structopt(long)]
    boot: Option<String>,

    /// Byte value that, when read from stdin, triggers a clean shutdown instead of being queued
    /// as console input.
    #[structopt(long)]
    escape: Option<u8>,

    /// Path to write per-instruction trace output to.
    #[structopt(long, parse(from_os_str))]
    trace: Option<PathBuf>,

    /// Path to a symbol table used to annotate trace output (format is host-defined; unused if
    /// tracing is disabled).
    #[structopt(long, parse(from_os_str))]
    symbols: Option<PathBuf>,

    /// Raises diagnostic verbosity: with `--trace` given, logs one line per trap and `HALT`.
    #[structopt(long)]
    debug: bool,

    /// Rejects accesses to unrecognized ports instead of the default read-0xFF/drop-write policy.
    #[structopt(long = "strict-io")]
    strict_io: bool,
}

/// Placeholder [`Z80Core`] used until a real decoder is linked in: every step reports an
/// unimplemented opcode, since this binary alone never has a decoder to hand the driver (§1's
/// excluded collaborator). Wiring in a real core means swapping this type out at the call site
/// below.
#[derive(Debug, Default)]
struct NullCore {
    a: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,
    pc: u16,
    sp: u16,
    mode: CpuMode,
}

impl Z80Core for NullCore {
    fn get_a(&self) -> u8 {
        self.a
    }
    fn set_a(&mut self, value: u8) {
        self.a = value;
    }
    fn get_b(&self) -> u8 {
        self.b
    }
    fn set_b(&mut self, value: u8) {
        self.b = value;
    }
    fn get_c(&self) -> u8 {
        self.c
    }
    fn set_c(&mut self, value: u8) {
        self.c = value;
    }
    fn get_d(&self) -> u8 {
        self.d
    }
    fn set_d(&mut self, value: u8) {
        self.d = value;
    }
    fn get_e(&self) -> u8 {
        self.e
    }
    fn set_e(&mut self, value: u8) {
        self.e = value;
    }
    fn get_h(&self) -> u8 {
        self.h
    }
    fn set_h(&mut self, value: u8) {
        self.h = value;
    }
    fn get_l(&self) -> u8 {
        self.l
    }
    fn set_l(&mut self, value: u8) {
        self.l = value;
    }
    fn get_pc(&self) -> u16 {
        self.pc
    }
    fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }
    fn get_sp(&self) -> u16 {
        self.sp
    }
    fn set_sp(&mut self, value: u16) {
        self.sp = value;
    }
    fn set_mode(&mut self, mode: CpuMode) {
        self.mode = mode;
    }
    fn mode(&self) -> CpuMode {
        self.mode
    }

    fn execute_one(&mut self, _memory: &mut dyn Memory) -> StepOutcome {
        StepOutcome::UnimplementedOpcode(0x00)
    }
}

/// Parses a symbol table file into an address-to-name map, used only to annotate trace output
/// (§3.1: entirely absent from the core's control flow). One `ADDR NAME` pair per line in hex
/// without a `0x` prefix; blank lines and lines starting with `#` are ignored.
fn load_symbols(path: &PathBuf) -> io::Result<HashMap<u16, String>> {
    let file = fs::File::open(path)?;
    let mut symbols = HashMap::new();

    for line in io::BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((addr, name)) = line.split_once(char::is_whitespace) {
            if let Ok(addr) = u16::from_str_radix(addr.trim(), 16) {
                symbols.insert(addr, name.trim().to_string());
            }
        }
    }

    Ok(symbols)
}

/// Wraps a trace file, rewriting each `pc=0x????` occurrence with the matching symbol name when
/// one is known. Buffers by line since a single trace line may arrive across several `write`
/// calls (`writeln!` on a trait object writes its formatted pieces separately).
struct SymbolAnnotatingSink {
    inner: fs::File,
    symbols: HashMap<u16, String>,
    buffer: Vec<u8>,
}

impl SymbolAnnotatingSink {
    fn new(inner: fs::File, symbols: HashMap<u16, String>) -> Self {
        SymbolAnnotatingSink {
            inner,
            symbols,
            buffer: Vec::new(),
        }
    }

    fn annotate(&self, line: &str) -> String {
        if let Some(idx) = line.find("pc=0x") {
            let hex = &line[idx + 5..];
            let hex = &hex[..hex.len().min(4)];
            if let Ok(pc) = u16::from_str_radix(hex, 16) {
                if let Some(name) = self.symbols.get(&pc) {
                    return format!("{} ({})", line, name);
                }
            }
        }
        line.to_string()
    }
}

impl Write for SymbolAnnotatingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            writeln!(self.inner, "{}", self.annotate(text.trim_end()))?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Exit code for a usage or file-loading failure.
const EXIT_USAGE_ERROR: i32 = 1;
/// Exit code for a fatal runtime condition (unimplemented opcode, disk error during boot setup).
const EXIT_RUNTIME_ERROR: i32 = 2;

fn main() {
    pretty_env_logger::init();

    let opt = Opt::from_args();

    if let Err(err) = run(opt) {
        eprintln!("wbw-emu: {}", err);
        process::exit(EXIT_RUNTIME_ERROR);
    }
}

fn run(opt: Opt) -> anyhow::Result<()> {
    let rom = load_file(&opt.romwbw).unwrap_or_else(|err| {
        eprintln!("wbw-emu: unable to read ROM image: {}", err);
        process::exit(EXIT_USAGE_ERROR);
    });

    let mut builder = Emulator::builder()
        .with_strict_io(opt.strict_io)
        .with_debug(opt.debug);

    if let Some(trace_path) = &opt.trace {
        let trace_file = fs::File::create(trace_path)?;
        match &opt.symbols {
            Some(symbols_path) => {
                let symbols = load_symbols(symbols_path)?;
                builder = builder.with_trace_sink(SymbolAnnotatingSink::new(trace_file, symbols));
            }
            None => builder = builder.with_trace_sink(trace_file),
        }
    }

    let mut emulator = builder.build();
    emulator.load_rom(&rom);

    let disks = [
        (0usize, opt.hbdisk0.or(opt.disk0)),
        (1usize, opt.hbdisk1.or(opt.disk1)),
        (2usize, opt.hbdisk2),
        (3usize, opt.hbdisk3),
        (4usize, opt.hbdisk4),
        (5usize, opt.hbdisk5),
        (6usize, opt.hbdisk6),
        (7usize, opt.hbdisk7),
        (8usize, opt.hbdisk8),
        (9usize, opt.hbdisk9),
        (10usize, opt.hbdisk10),
        (11usize, opt.hbdisk11),
        (12usize, opt.hbdisk12),
        (13usize, opt.hbdisk13),
        (14usize, opt.hbdisk14),
        (15usize, opt.hbdisk15),
    ];

    for (unit, path) in disks.iter() {
        if let Some(path) = path {
            let image = load_file(path)?;
            emulator.load_disk(*unit, image)?;
        }
    }

    if let Some(boot) = &opt.boot {
        for byte in boot.bytes() {
            emulator.queue_input(byte);
        }
        emulator.queue_input(b'\r');
    }

    let mut core = NullCore::default();
    core.set_pc(0);

    let stdin = io::stdin();
    let stdout = io::stdout();

    loop {
        let mut input = [0u8; 1];
        if stdin.lock().read(&mut input).unwrap_or(0) == 1 {
            if Some(input[0]) == opt.escape {
                break;
            }
            emulator.queue_input(input[0]);
        }

        let outcome = emulator.run_batch(&mut core);

        let output = emulator.drain_output();
        if !output.is_empty() {
            stdout.lock().write_all(&output)?;
            stdout.lock().flush()?;
        }

        match outcome {
            BatchOutcome::BudgetExhausted => continue,
            BatchOutcome::Halted => break,
            BatchOutcome::UnimplementedOpcode(opcode) => {
                anyhow::bail!("unimplemented opcode 0x{:02X} at halt", opcode);
            }
            BatchOutcome::StrictIoViolation(port) => {
                anyhow::bail!("rejected unrecognized port 0x{:02X} under --strict-io", port);
            }
        }
    }

    Ok(())
}

fn load_file(path: &PathBuf) -> io::Result<Vec<u8>> {
    fs::read(path)
}
