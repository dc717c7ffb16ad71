use std::{env, fs, path::PathBuf, process};

use cinder::bytecode::{disasm, Compiler};
use cinder::lexer::Lexer;
use cinder::parser::Parser;

fn print_usage() {
    println!("Usage: cinderc [options] <source file>");
    println!();
    println!("Options:");
    println!("  -h, --help            Show this help message");
    println!("  --version             Show version");
    println!("  -o <file>             Write the container to <file> (default: <source>.cbc)");
    println!("  --tokens              Dump the token stream and exit");
    println!("  --ast                 Dump the parsed AST and exit");
    println!("  --dump-bytecode       Print a disassembly after compiling");
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut show_help = false;
    let mut tokens_only = false;
    let mut ast_only = false;
    let mut dump_bytecode = false;
    let mut output: Option<PathBuf> = None;
    let mut source_file: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--version" => {
                println!("cinderc {}", env!("CARGO_PKG_VERSION"));
                return;
            }
            "-h" | "--help" => show_help = true,
            "--tokens" => tokens_only = true,
            "--ast" => ast_only = true,
            "--dump-bytecode" => dump_bytecode = true,
            "-o" => {
                i += 1;
                match args.get(i) {
                    Some(path) => output = Some(PathBuf::from(path)),
                    None => {
                        eprintln!("Error: -o requires a file name");
                        process::exit(1);
                    }
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                print_usage();
                process::exit(1);
            }
            arg => source_file = Some(arg.to_string()),
        }
        i += 1;
    }

    if show_help {
        print_usage();
        return;
    }

    let source_file = match source_file {
        Some(f) => f,
        None => {
            eprintln!("Error: No source file specified");
            print_usage();
            process::exit(1);
        }
    };

    let source = match fs::read_to_string(&source_file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", source_file, e);
            process::exit(1);
        }
    };

    let tokens = match Lexer::new(&source).tokenize() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            process::exit(1);
        }
    };

    if tokens_only {
        for token in &tokens {
            println!("{}", token);
        }
        return;
    }

    let program = match Parser::new(tokens).parse_program() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if ast_only {
        println!("{:#?}", program);
        return;
    }

    let image = match Compiler::new().compile(&program) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if dump_bytecode {
        disasm::print_image(&image);
    }

    let output = output.unwrap_or_else(|| PathBuf::from(&source_file).with_extension("cbc"));
    if let Err(e) = image.write_file(&output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
