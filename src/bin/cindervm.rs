use std::{env, path::Path, process};

use cinder::bytecode::{disasm, Image};
use cinder::runtime::Vm;

fn print_usage() {
    println!("Usage: cindervm [options] <bytecode file>");
    println!("Options:");
    println!("  -h, --help            Show this help message");
    println!("  -d, --debug           Enable debug mode (trace execution)");
    println!("  -s, --stats           Show execution statistics");
    println!("  --disassemble         Disassemble bytecode and exit");
    println!("  --dump-stack          Dump stack after execution");
    println!("  --dump-memory         Dump memory after execution");
    println!("  --version             Show version");
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut show_help = false;
    let mut debug_mode = false;
    let mut show_stats = false;
    let mut disassemble_only = false;
    let mut dump_stack = false;
    let mut dump_memory = false;
    let mut bytecode_file: Option<String> = None;

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--version" => {
                println!("Cinder virtual machine {}", env!("CARGO_PKG_VERSION"));
                println!("Stack-based bytecode interpreter");
                return;
            }
            "-h" | "--help" => show_help = true,
            "-d" | "--debug" => debug_mode = true,
            "-s" | "--stats" => show_stats = true,
            "--disassemble" => disassemble_only = true,
            "--dump-stack" => dump_stack = true,
            "--dump-memory" => dump_memory = true,
            other if other.starts_with('-') => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                process::exit(1);
            }
            other => bytecode_file = Some(other.to_string()),
        }
    }

    if show_help {
        print_usage();
        return;
    }

    let bytecode_file = match bytecode_file {
        Some(f) => f,
        None => {
            eprintln!("Error: No bytecode file specified");
            print_usage();
            process::exit(1);
        }
    };

    let image = match Image::read_file(Path::new(&bytecode_file)) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if disassemble_only {
        disasm::print_image(&image);
        return;
    }

    let mut vm = Vm::new();
    vm.load(image);
    vm.set_debug(debug_mode);

    vm.run();

    if vm.has_error() {
        eprintln!("Execution failed: {}", vm.error_message());
        process::exit(1);
    }

    if dump_stack {
        vm.dump_stack();
    }
    if dump_memory {
        vm.dump_memory();
    }
    if show_stats {
        vm.print_stats();
    }
}
