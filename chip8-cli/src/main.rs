//! Entrypoint for CLI
mod error;

use std::{
    env, fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use chip8::{constants::*, prelude::*, IMPL_VERSION};
use log::{debug, error, info};

use self::error::AppError;

static USAGE: &str = r#"
usage: chip8 CMD FILE [OPTIONS]

commands:
    run     Run the target ROM file, then print the screen
    dis     Disassemble the target ROM into readable instructions

options:
    --conf FILE      YAML file with interpreter settings
    --seconds N      How long to run the ROM for (default 2)
    --key K          Hold down keypad key K (0-F) while running

examples:
    chip8 run maze.rom
    chip8 run pong.rom --conf chip8.yaml --seconds 10 --key 5
    chip8 dis maze.rom
"#;

/// Default amount of time a ROM is run for.
const DEFAULT_SECONDS: u64 = 2;

/// How often the run loop checks whether the program stopped.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Host output for a terminal session.
///
/// The screen is printed once at the end of the run, so redraws are only counted in the log.
#[derive(Default)]
struct TerminalDevices {
    /// Raised when the program stops on an error of its own.
    stopped: Arc<AtomicBool>,
}

impl Devices for TerminalDevices {
    fn redraw(&self) {
        log::trace!("redraw");
    }

    fn beep(&self) {
        debug!("beep");
    }

    fn error(&self, err: &Chip8Error) {
        if err.is_runtime() {
            eprintln!("program stopped: {err}");
            self.stopped.store(true, Ordering::SeqCst);
        }
    }
}

fn run_bytecode(opts: RunOpts) -> Result<(), AppError> {
    let conf = match &opts.conf {
        Some(filepath) => {
            let file = fs::File::open(filepath)?;
            let conf: Chip8Conf = serde_yaml::from_reader(file)?;
            debug!("loaded config: {conf:?}");
            conf
        }
        None => Chip8Conf::default(),
    };

    let devices = TerminalDevices::default();
    let stopped = devices.stopped.clone();

    let bytecode = fs::read(&opts.filepath)?;

    let mut runner = Runner::new(Chip8Vm::with_devices(conf, devices));
    runner.load(bytecode.as_slice())?;

    for key in &opts.keys {
        runner.key_down(*key);
    }

    info!("running {} for {}s", opts.filepath, opts.seconds);
    runner.resume();
    let deadline = Instant::now() + Duration::from_secs(opts.seconds);
    while Instant::now() < deadline && !stopped.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
    }
    runner.suspend();

    let vm = runner.vm();
    let vm = vm
        .lock()
        .map_err(|_| AppError::arg("interpreter thread panicked"))?;
    println!("{}", vm.dump_display());
    println!("pc: {:04X}", vm.cpu().pc());

    if stopped.load(Ordering::SeqCst) {
        return Err(AppError::stopped(vm.cpu().pc()));
    }

    Ok(())
}

fn run_disassembler(filepath: &str) -> Result<(), AppError> {
    let bytecode = fs::read(filepath)?;

    let mut vm = Chip8Vm::new(Chip8Conf::default());
    vm.load_bytecode(bytecode.as_slice())?;

    // Round up so a trailing odd byte is still shown.
    let len = bytecode.len() + bytecode.len() % 2;
    match vm.dump_ram(len) {
        Ok(listing) => print!("{listing}"),
        Err(err) => error!("disassembly failed: {err}"),
    }

    Ok(())
}

fn main() {
    simple_logger::SimpleLogger::new().env().init().ok();

    let result = match parse_args(env::args().skip(1)) {
        Ok(Cmd::Run(opts)) => run_bytecode(opts),
        Ok(Cmd::Dis { filepath }) => run_disassembler(&filepath),
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1)
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Cmd, AppError> {
    let cmd = args
        .next()
        .ok_or_else(|| AppError::arg("missing command"))?;

    match cmd.as_str() {
        "run" => {
            let mut opts = RunOpts {
                filepath: consume_arg(&mut args, "FILE")?,
                conf: None,
                seconds: DEFAULT_SECONDS,
                keys: Vec::new(),
            };

            while let Some(flag) = args.next() {
                match flag.as_str() {
                    "--conf" => opts.conf = Some(consume_arg(&mut args, "--conf")?),
                    "--seconds" => {
                        let value = consume_arg(&mut args, "--seconds")?;
                        opts.seconds = value
                            .parse()
                            .map_err(|_| AppError::arg(format!("invalid seconds: {value}")))?;
                    }
                    "--key" => {
                        let value = consume_arg(&mut args, "--key")?;
                        opts.keys.push(parse_key(&value)?);
                    }
                    _ => return Err(AppError::arg(format!("unknown option: {flag}"))),
                }
            }

            Ok(Cmd::Run(opts))
        }
        "dis" => Ok(Cmd::Dis {
            filepath: consume_arg(&mut args, "FILE")?,
        }),
        _ => Err(AppError::arg(format!("unknown command: {cmd}"))),
    }
}

/// Consumes the next argument, failing with the name of what was expected.
fn consume_arg(args: &mut impl Iterator<Item = String>, name: &str) -> Result<String, AppError> {
    args.next()
        .ok_or_else(|| AppError::arg(format!("missing argument: {name}")))
}

/// Keypad keys are given as a single hexadecimal digit.
fn parse_key(value: &str) -> Result<KeyCode, AppError> {
    u8::from_str_radix(value, 16)
        .ok()
        .filter(|key_id| *key_id < KEY_COUNT)
        .and_then(|key_id| KeyCode::try_from(key_id).ok())
        .ok_or_else(|| AppError::arg(format!("invalid key: {value}")))
}

fn print_usage() {
    println!("Chip8 v{IMPL_VERSION}");
    println!("{USAGE}");
}

enum Cmd {
    /// Run file
    Run(RunOpts),
    /// Disassemble
    Dis { filepath: String },
}

struct RunOpts {
    filepath: String,
    conf: Option<String>,
    seconds: u64,
    keys: Vec<KeyCode>,
}
