use std::{env, fs, path::PathBuf, process::ExitCode};

use lutra::{Engine, EngineOptions, RunStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: lutra [options] [script.js]
  -c command   run the inline command instead of a file
  -d           print the bytecode listing after compiling
  -f           disable denormal numbers (recorded; no-op on this target)
  -p path      add a module search path (repeatable)
  -q           quiet: suppress print output
  -s           sandbox: no filesystem access, imports disabled
  -t type      top-level type: script (default) or module
  -u           unsafe: lift the memory ceiling
  -a           print the syntax tree after parsing
  -v           print the version and exit";

struct CliArgs {
    command: Option<String>,
    file: Option<String>,
    options: EngineOptions,
    show_ast: bool,
    no_denormals: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(Some(cli)) => cli,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}\n{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let _ = cli.no_denormals;

    let source = match &cli.command {
        Some(command) => command.clone(),
        None => match &cli.file {
            Some(file) => match read_file(file) {
                Ok(source) => source,
                Err(message) => {
                    eprintln!("error: {message}");
                    return ExitCode::FAILURE;
                }
            },
            None => {
                eprintln!("error: no script given\n{USAGE}");
                return ExitCode::FAILURE;
            }
        },
    };

    let show_ast = cli.show_ast;
    let show_disassembly = cli.options.disassemble;

    let mut engine = Engine::new(cli.options);
    if let Err(err) = engine.compile(&source) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    if show_ast {
        if let Some(ast) = engine.ast_dump() {
            println!("{ast}");
        }
    }
    if show_disassembly {
        if let Some(listing) = engine.disassembly() {
            println!("{listing}");
        }
    }

    let mut vm = match engine.vm() {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = vm.start() {
        eprintln!("Thrown:\n{}", err.stack_string());
        return ExitCode::FAILURE;
    }

    // Drain events until nothing remains. With no host timer backend,
    // `Again` with nothing posted means timers that can never fire.
    loop {
        match vm.run() {
            Ok(RunStatus::Ok) => break,
            Ok(RunStatus::Again) => {
                if !vm.posted() {
                    break;
                }
            }
            Err(err) => {
                eprintln!("Thrown:\n{}", err.stack_string());
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

fn parse_args(args: &[String]) -> Result<Option<CliArgs>, String> {
    let mut cli = CliArgs {
        command: None,
        file: None,
        options: EngineOptions::default(),
        show_ast: false,
        no_denormals: false,
    };
    if let Ok(path_env) = env::var("LUTRA_PATH") {
        cli.options.paths.extend(path_env.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
    }

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" => {
                let command = iter.next().ok_or("option -c requires an argument")?;
                cli.command = Some(command.clone());
            }
            "-d" => cli.options.disassemble = true,
            "-f" => cli.no_denormals = true,
            "-p" => {
                let path = iter.next().ok_or("option -p requires an argument")?;
                cli.options.paths.push(PathBuf::from(path));
            }
            "-q" => cli.options.quiet = true,
            "-s" => cli.options.sandbox = true,
            "-t" => {
                let kind = iter.next().ok_or("option -t requires an argument")?;
                match kind.as_str() {
                    "script" => cli.options.module = false,
                    "module" => cli.options.module = true,
                    other => return Err(format!("unknown top-level type \"{other}\"")),
                }
            }
            "-u" => cli.options.unsafe_mode = true,
            "-a" => cli.show_ast = true,
            "-v" => {
                println!("{VERSION}");
                return Ok(None);
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return Ok(None);
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown option \"{other}\""));
            }
            file => {
                if cli.file.is_some() {
                    return Err("more than one script given".to_owned());
                }
                cli.file = Some(file.to_owned());
                cli.options.script_name = file.to_owned();
            }
        }
    }

    // Remaining arguments after the script land in argv.
    cli.options.argv = args.to_vec();
    Ok(Some(cli))
}

fn read_file(file_path: &str) -> Result<String, String> {
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("cannot read {file_path}: {err}"));
        }
    }
    fs::read_to_string(file_path).map_err(|err| format!("cannot read {file_path}: {err}"))
}
