//! Command-line driver: reads one source file, compiles it, and writes the
//! resulting assembly to stdout.

use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use pascalc::CompileOptions;

#[derive(ClapParser)]
#[command(name = "pascalc")]
#[command(about = "Compile a Pascal-family source file to x86-64 assembly", long_about = None)]
struct Cli {
    /// Input source file
    input: PathBuf,

    /// Trace the parsed AST to stderr before code generation
    #[arg(short = 'p', long = "print-ast")]
    print_ast: bool,

    /// Trace every token produced by the scanner
    #[arg(short = 's', long = "trace-scan")]
    trace_scan: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = CompileOptions {
        trace_scan: cli.trace_scan,
        print_ast: cli.print_ast,
    };

    match pascalc::compile_file(&cli.input, options) {
        Ok(assembly) => {
            print!("{assembly}");
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}
