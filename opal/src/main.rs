#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::prelude::*;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::Arg;

use opalvm::debug::Debugger;
use opalvm::{ExitCode, Interpreter, MnemonicPrinter, Program};

#[derive(Debug)]
enum IOErrorContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Oasm(oasm::Error),
    Io(std::io::Error, IOErrorContext, PathBuf),
    Clap(clap::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => writeln!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IOErrorContext::ReadInput => "Reading input",
                    IOErrorContext::WriteOutput => "Writing output",
                },
                path.display(),
                err
            ),
            Error::Oasm(err) => {
                writeln!(f, "Assembling input failed:")?;
                write!(f, "{}", err)
            }
            Error::Clap(err) => write!(f, "{}", err),
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to use (.oas assembly or .obc bytecode)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .help("Writes the program back out (.oas text or .obc binary)"),
        )
        .arg(
            Arg::with_name("interpret")
                .short("i")
                .long("interpret")
                .help("Runs the program in the interpreter"),
        )
        .arg(
            Arg::with_name("n_times")
                .short("n")
                .long("n-times")
                .takes_value(true)
                .value_name("N")
                .default_value("1")
                .help("Runs the interpreter N times (for benchmarking)"),
        )
        .arg(
            Arg::with_name("print_asm")
                .long("print-asm")
                .help("Disassembles the program to stdout"),
        )
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("Runs under the interactive debugger on stdin/stdout"),
        )
        .arg(
            Arg::with_name("lib")
                .short("l")
                .long("lib")
                .takes_value(true)
                .value_name("LIB")
                .multiple(true)
                .number_of_values(1)
                .help("Names a dynamic library for external calls"),
        )
        .get_matches();

    let exit = run(&matches).unwrap_or_else(|err| {
        eprintln!("{}", err);
        2
    });
    std::process::exit(exit);
}

fn run(matches: &clap::ArgMatches) -> Result<i32, Error> {
    let input = matches.value_of("INPUT").unwrap();
    let input_path = Path::new(input);

    let n_times = value_t!(matches.value_of("n_times"), u32).map_err(Error::Clap)?;

    let program = load_program(input_path)?;

    if matches.is_present("print_asm") {
        let text = MnemonicPrinter::new(&program.instructions)
            .with_fn_table(&program.fn_table)
            .debug_string();
        println!("{}", text);
    }

    if let Some(output) = matches.value_of("output") {
        write_output(&program, Path::new(output))?;
    }

    if !matches.is_present("interpret") && !matches.is_present("debug") {
        return Ok(0);
    }

    let mut interp = Interpreter::new();
    interp.load_program(program);
    if let Some(libs) = matches.values_of("lib") {
        for lib in libs {
            interp.add_library(lib);
        }
    }

    let mut code = ExitCode::Exited;
    if matches.is_present("debug") {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut debugger = Debugger::new(
            Box::new(BufReader::new(stdin.lock())),
            Box::new(stdout.lock()),
        );
        code = interp.run_debug(&mut debugger);
    } else {
        if n_times > 1 {
            println!("running interpreter {} times...", n_times);
        }
        for _ in 0..n_times {
            interp.reset();
            code = interp.run();
            if !code.is_success() {
                break;
            }
        }
    }

    if code.is_success() {
        println!("RETURN VALUE: (i64) {}", interp.read_stack::<i64>(0));
        Ok(0)
    } else {
        eprintln!("{}", code);
        Ok(1)
    }
}

fn load_program(input_path: &Path) -> Result<Program, Error> {
    let is_binary = input_path
        .extension()
        .map(|ext| ext == "obc")
        .unwrap_or(false);

    if is_binary {
        let bytecode = obcfile::read_file(input_path)
            .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;
        let (fn_table, instructions) = bytecode.into_parts();
        return Ok(Program {
            instructions,
            fn_table,
            ..Program::default()
        });
    }

    let file = File::open(input_path)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;
    let mut reader = BufReader::new(file);
    let mut source = String::new();
    reader
        .read_to_string(&mut source)
        .map_err(|err| Error::Io(err, IOErrorContext::ReadInput, input_path.to_owned()))?;

    oasm::assemble_named(&input_path.to_string_lossy(), &source).map_err(|err| {
        Error::Oasm(match input_path.to_str() {
            Some(path_str) => err.with_path(path_str),
            None => err,
        })
    })
}

fn write_output(program: &Program, output_path: &Path) -> Result<(), Error> {
    let as_text = output_path
        .extension()
        .map(|ext| ext == "oas")
        .unwrap_or(false);

    if as_text {
        let text = MnemonicPrinter::new(&program.instructions)
            .with_fn_table(&program.fn_table)
            .debug_string();
        let file = File::create(output_path)
            .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path.to_owned()))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(text.as_bytes())
            .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path.to_owned()))?;
        return Ok(());
    }

    let bytecode = obcfile::Bytecode::from(program.fn_table.clone(), program.instructions.clone());
    obcfile::write_file(output_path, &bytecode)
        .map_err(|err| Error::Io(err, IOErrorContext::WriteOutput, output_path.to_owned()))
}
