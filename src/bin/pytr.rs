//! pytr CLI - транспилятор и проверка эквивалентности.
//!
//! Использование:
//!   pytr <file.py>                       - напечатать код на Rust
//!   pytr <file.py> --emit ir -o out.txt  - вывести IR в файл
//!   pytr run <file.py>                   - выполнить эталонным интерпретатором
//!   pytr check <file.py> <file.rs> ...   - сравнить исходник и артефакт
//!   pytr --help                          - справка

use std::env;
use std::fs;
use std::path::Path;
use std::process;

use pytr::harness::{check_files, Fixture, HarnessConfig, SourceRunner};
use pytr::interpreter::run_program;
use pytr::{compile, parse, EmitKind, OperationMapping, TranspileError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = r#"
pytr - transpiler from a typed Python subset to Rust

USAGE:
    pytr <file.py> [OPTIONS]             Transpile a file
    pytr run <file.py>                   Run a file with the reference interpreter
    pytr check <file.py> <file.rs> [CHECK OPTIONS]
                                         Compare a source file with its artifact
    pytr --help, -h                      Show this help
    pytr --version, -v                   Show version

OPTIONS:
    --emit <ast|ir|rust>     What to print (default: rust)
    -o, --output <FILE>      Write the result to FILE
    --mapping <FILE>         Use a custom operation mapping table

CHECK OPTIONS:
    --fixture <EXPR>         Call to compare, e.g. "f([1, 2])"; "program" runs
                             the module as a program (repeatable, default: program)
    --config <FILE>          Harness configuration (JSON)
    --reference              Use the built-in interpreter instead of python3
    --json                   Print the report as JSON
    --mapping <FILE>         Mapping table used for call drivers

ENVIRONMENT:
    RUST_LOG=debug           Show pipeline logs

EXAMPLES:
    pytr fixtures/my_len.py -o my_len.rs
    pytr check fixtures/process_list.py process_list.rs --fixture "process_list([1, 2, 3])"
"#;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        None => {
            eprintln!("No input file.");
            eprintln!("Use --help for usage information.");
            process::exit(1);
        }
        Some("--help" | "-h") => println!("{}", HELP),
        Some("--version" | "-v") => println!("pytr {}", VERSION),
        Some("run") => run_file(&args[1..]),
        Some("check") => run_check(&args[1..]),
        Some(_) => run_transpile(&args),
    }
}

/// Завершить работу с сообщением об ошибке.
fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}

fn read_source(path: &str) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|e| fail(format!("Error reading file '{}': {}", path, e)))
}

fn option_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> &'a str {
    *i += 1;
    match args.get(*i) {
        Some(value) => value.as_str(),
        None => fail(format!("Option {} requires a value.", flag)),
    }
}

fn load_mapping(path: Option<&str>) -> OperationMapping {
    let mapping = match path {
        Some(path) => OperationMapping::from_file(path),
        None => OperationMapping::rust(),
    };
    mapping.unwrap_or_else(|e| fail(format!("error: {}", e)))
}

fn report_transpile_error(path: &str, err: &TranspileError) -> ! {
    eprintln!("error: {}", err);
    if let Some(position) = err.position() {
        eprintln!("  --> {}:{}", path, position);
    }
    if let Some(hint) = err.hint() {
        eprintln!("hint: {}", hint.trim_end());
    }
    process::exit(1);
}

fn run_transpile(args: &[String]) {
    let mut input = None;
    let mut output = None;
    let mut mapping_path = None;
    let mut kind = EmitKind::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--emit" => {
                let value = option_value(args, &mut i, "--emit");
                kind = value.parse().unwrap_or_else(|e: String| fail(e));
            }
            "-o" | "--output" => output = Some(option_value(args, &mut i, "--output")),
            "--mapping" => mapping_path = Some(option_value(args, &mut i, "--mapping")),
            flag if flag.starts_with('-') => {
                eprintln!("Unknown option: {}", flag);
                fail("Use --help for usage information.");
            }
            file if input.is_none() => input = Some(file),
            _ => fail("Too many arguments."),
        }
        i += 1;
    }

    let Some(input) = input else {
        fail("No input file.");
    };
    let source = read_source(input);
    let mapping = load_mapping(mapping_path);
    let result = compile(&source, kind, &mapping)
        .unwrap_or_else(|e| report_transpile_error(input, &e));

    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, &result) {
                fail(format!("Error writing '{}': {}", path, e));
            }
        }
        None => print!("{}", result),
    }
}

fn run_file(args: &[String]) {
    let [path] = args else {
        fail("Usage: pytr run <file.py>");
    };
    let source = read_source(path);
    let ast = parse(&source).unwrap_or_else(|e| report_transpile_error(path, &e.into()));
    let (output, result) = run_program(&ast);
    print!("{}", output);
    if let Err(e) = result {
        fail(format!("Runtime error: {}", e));
    }
}

fn run_check(args: &[String]) {
    let mut files = Vec::new();
    let mut fixtures = Vec::new();
    let mut config = HarnessConfig::default();
    let mut mapping_path = None;
    let mut reference = false;
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--fixture" => fixtures.push(Fixture::parse(option_value(args, &mut i, "--fixture"))),
            "--config" => {
                let path = option_value(args, &mut i, "--config");
                config = HarnessConfig::from_file(path)
                    .unwrap_or_else(|e| fail(format!("error: {}", e)));
            }
            "--mapping" => mapping_path = Some(option_value(args, &mut i, "--mapping")),
            "--reference" => reference = true,
            "--json" => json = true,
            flag if flag.starts_with('-') => {
                eprintln!("Unknown option: {}", flag);
                fail("Use --help for usage information.");
            }
            file => files.push(file),
        }
        i += 1;
    }

    let [source, artifact] = files.as_slice() else {
        fail("Usage: pytr check <file.py> <file.rs> [--fixture EXPR]...");
    };
    if reference {
        config.source_runner = SourceRunner::Reference;
    }
    if fixtures.is_empty() {
        fixtures.push(Fixture::Program);
    }
    let mapping = load_mapping(mapping_path);

    let report = check_files(
        Path::new(source),
        Path::new(artifact),
        &fixtures,
        &mapping,
        &config,
    )
    .unwrap_or_else(|e| fail(format!("error: {}", e)));

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(format!("error: {}", e)),
        }
    } else {
        println!("{}", report);
    }
    if !report.all_match() {
        process::exit(1);
    }
}
