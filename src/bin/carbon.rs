// Carbon CLI - Command Line Interface
// Usage: carbon [FILE] [ARGS]... [OPTIONS]

use clap::Parser;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use tracing_subscriber::EnvFilter;

use carbon_core::compiler::{CompileOutput, Compiler};
use carbon_core::error::CarbonError;
use carbon_core::native::NativeClasses;
use carbon_core::vm::VM;
use carbon_core::Config;

/// Interpreter stack; deep Carbon recursion recurses natively in the VM
const VM_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Kept free below the deepest scripted call
const VM_STACK_RESERVE: usize = 16 * 1024 * 1024;

/// Carbon - A class-based scripting language
#[derive(Parser)]
#[command(name = "carbon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A class-based scripting language", long_about = None)]
struct Cli {
    /// Source file to run (.cb)
    file: Option<PathBuf>,

    /// Arguments passed to main
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Debug options: asm (comma-separated)
    #[arg(short = 'd', long = "debug", value_delimiter = ',')]
    debug: Option<Vec<String>>,

    /// Execute inline code
    #[arg(short = 'e', long = "exec")]
    exec: Option<String>,

    /// Check for errors without running
    #[arg(long = "check")]
    check: bool,

    /// Configuration file (defaults to carbon.json next to the script)
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

#[derive(Default, Clone, Copy)]
struct DebugFlags {
    asm: bool,
}

impl DebugFlags {
    fn from_options(options: &Option<Vec<String>>) -> Self {
        let mut flags = DebugFlags::default();
        for option in options.iter().flatten() {
            match option.trim().to_lowercase().as_str() {
                "asm" => flags.asm = true,
                other => eprintln!("{} unknown debug option '{}'", "!".yellow(), other),
            }
        }
        flags
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    init_logging(&config);

    let debug = DebugFlags::from_options(&cli.debug);

    // Compiled values are not Send: the whole pipeline runs on the VM thread
    let worker = thread::Builder::new()
        .name("carbon-vm".to_string())
        .stack_size(VM_STACK_SIZE)
        .spawn(move || dispatch(cli, config, debug));

    let code = match worker.map(|handle| handle.join()) {
        Ok(Ok(Ok(code))) => code,
        Ok(Ok(Err(message))) => {
            eprintln!("{}", message);
            1
        }
        Ok(Err(_)) => {
            eprintln!("{} interpreter thread panicked", "error:".red().bold());
            1
        }
        Err(e) => {
            eprintln!("{} can't start interpreter thread: {}", "error:".red().bold(), e);
            1
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli, config: Config, debug: DebugFlags) -> Result<i32, String> {
    if let Some(code) = cli.exec {
        handle_exec(&code, config, debug)
    } else if let Some(path) = cli.file {
        if cli.check {
            handle_check(&path, config).map(|_| 0)
        } else {
            handle_run(&path, &cli.args, config, debug)
        }
    } else {
        Err(format!(
            "{} no input file. Run 'carbon --help' for usage.",
            "error:".red().bold()
        ))
    }
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    if let Some(path) = &cli.config {
        return Config::load(path).map_err(|e| e.to_string());
    }
    let dir = cli
        .file
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Config::discover(dir).map_err(|e| e.to_string())
}

/// `CARBON_LOG` overrides the configured level
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env("CARBON_LOG")
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Compile a file and print its warnings
fn compile(
    path: &Path,
    natives: &Rc<NativeClasses>,
    config: &Config,
) -> Result<CompileOutput, String> {
    let path_str = path.to_string_lossy().to_string();
    let source = fs::read_to_string(path)
        .map_err(|e| format!("{} can't read '{}': {}", "error:".red().bold(), path_str, e))?;

    let mut compiler = Compiler::new(natives.clone(), config.clone());
    let output = compiler
        .compile_source(&source, &path_str)
        .map_err(|e| report(e, &path_str, &source))?;
    print_warnings(&output, config);
    Ok(output)
}

fn print_warnings(output: &CompileOutput, config: &Config) {
    if config.print_warnings {
        for warning in &output.warnings {
            eprintln!("{}", warning);
        }
    }
}

fn report(err: CarbonError, path: &str, source: &str) -> String {
    let err = if err.file == path {
        err.with_source_if_missing(source)
    } else {
        err
    };
    err.format()
}

fn handle_check(path: &Path, config: Config) -> Result<(), String> {
    compile(path, &Rc::new(NativeClasses::new()), &config)?;
    println!("{} {} is valid", "✓".green(), path.display());
    Ok(())
}

fn handle_run(
    path: &Path,
    args: &[String],
    config: Config,
    debug: DebugFlags,
) -> Result<i32, String> {
    let natives = Rc::new(NativeClasses::new());
    let output = compile(path, &natives, &config)?;
    if debug.asm {
        println!("{}", output.bytecode.disassemble());
    }

    let path_str = path.to_string_lossy().to_string();
    let mut vm =
        VM::new(natives, &config).with_stack_budget(VM_STACK_SIZE - VM_STACK_RESERVE);
    vm.run(&output.bytecode, args).map_err(|e| {
        let source = fs::read_to_string(path).unwrap_or_default();
        report(e, &path_str, &source)
    })
}

fn handle_exec(code: &str, config: Config, debug: DebugFlags) -> Result<i32, String> {
    let path = "<exec>";
    let mut compiler = Compiler::new(Rc::new(NativeClasses::new()), config.clone());
    let output = compiler
        .compile_source(code, path)
        .map_err(|e| report(e, path, code))?;
    print_warnings(&output, &config);
    if debug.asm {
        println!("{}", output.bytecode.disassemble());
    }

    let mut vm = VM::new(compiler.natives().clone(), &config)
        .with_stack_budget(VM_STACK_SIZE - VM_STACK_RESERVE);
    vm.run(&output.bytecode, &[]).map_err(|e| report(e, path, code))
}
