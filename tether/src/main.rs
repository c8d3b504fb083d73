use clap::Parser as ClapParser;
use std::{path::PathBuf, process, sync::Arc};

use tether::{
    FunctionIndex, GcConfig, Instr, Machine, MachineCreateInfo, Reg,
    TranslationUnit, assemble, describe, sys,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Bytecode VM for prototype-object programs", long_about = None)]
struct Cli {
    /// Compiled translation units to execute in order
    #[arg(required = false, help = "The compiled units to execute")]
    files: Vec<PathBuf>,

    /// Run the built-in demo unit (default if no files are given)
    #[arg(long, help = "Force the demo unit after file execution")]
    demo: bool,

    #[arg(long, help = "Arena bucket capacity")]
    bucket_capacity: Option<usize>,

    #[arg(long, help = "Allocations between GC trace passes")]
    gc_threshold: Option<usize>,
}

fn demo_unit() -> TranslationUnit {
    let mut unit = TranslationUnit::default();
    unit.push(assemble(&[
        Instr::Sys { index: FunctionIndex(sys::STDOUT) },
        Instr::Str { value: "6 * 7 = ".into() },
        Instr::Sys { index: FunctionIndex(sys::STREAM_PUT) },
        Instr::Int { value: 6 },
        Instr::Sys { index: FunctionIndex(sys::NUM_OBJ) },
        Instr::Push { src: Reg::Ret, stack: Reg::Arg },
        Instr::Int { value: 7 },
        Instr::Sys { index: FunctionIndex(sys::NUM_OBJ) },
        Instr::Push { src: Reg::Ret, stack: Reg::Arg },
        Instr::Sys { index: FunctionIndex(sys::NUM_MUL) },
        Instr::ThroQ,
        Instr::Mov { src: Reg::Ret, dst: Reg::Ptr },
        Instr::Load { reg: Reg::Num0 },
        Instr::Sys { index: FunctionIndex(sys::NUM_TO_STR) },
        Instr::Sys { index: FunctionIndex(sys::STREAM_PUT_LINE) },
    ]));
    unit
}

fn run_demo(machine: &mut Machine) {
    match machine.execute_unit(Arc::new(demo_unit())) {
        Ok(_) => {}
        Err(err) => {
            eprintln!("Error executing demo unit: {err}");
            process::exit(1);
        }
    }
    if let Some(exc) = machine.pending_exception() {
        let text = describe(machine.gc(), &machine.reader().symbols, exc);
        eprintln!("uncaught exception: {text}");
        process::exit(1);
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut gc = GcConfig::default();
    if let Some(capacity) = cli.bucket_capacity {
        gc.bucket_capacity = capacity;
    }
    if let Some(threshold) = cli.gc_threshold {
        gc.collect_threshold = threshold;
    }
    let mut machine = Machine::new(MachineCreateInfo { gc });

    for filename in &cli.files {
        match machine.run_file(filename) {
            Ok(0) => {}
            Ok(code) => process::exit(code),
            Err(err) => {
                eprintln!("Error executing '{}': {}", filename.display(), err);
                process::exit(1);
            }
        }
    }

    if cli.demo || cli.files.is_empty() {
        run_demo(&mut machine);
    }
}
