use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod kaleidoscope;

/// コマンドライン引数を定義するための構造体
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Kaleidoscope source file
    input: PathBuf,

    /// Where to write the LLVM IR module
    output: PathBuf,

    #[arg(long, help = "Print each parsed top-level item to stdout")]
    dump_ast: bool,

    #[arg(long, help = "Print the generated module to stdout")]
    dump_ir: bool,

    #[arg(
        long,
        value_name = "ID",
        help = "Module identifier (defaults to the input file stem)"
    )]
    module_id: Option<String>,
}

static TRACING_INIT: Once = Once::new();

/// `RUST_LOG` が設定されているときだけ tracing を有効にする
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_level(true),
                )
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

fn main() -> ExitCode {
    init_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    let mut pipeline = kaleidoscope::pipeline().dump_ast(cli.dump_ast);
    if let Some(id) = &cli.module_id {
        pipeline = pipeline.module_id(id.as_str());
    }

    let compilation = pipeline
        .compile_file(&cli.input)
        .with_context(|| format!("failed to read input file {}", cli.input.display()))?;
    debug!(
        diagnostics = compilation.diagnostics.len(),
        "compiled {}",
        cli.input.display()
    );

    for dump in &compilation.ast_dump {
        println!("{dump}");
    }
    // diagnostics are reported but do not fail the run
    for diag in &compilation.diagnostics {
        eprintln!("{diag}");
    }
    if cli.dump_ir {
        print!("{}", compilation.module);
    }

    write_output(&cli.output, compilation.module.as_bytes())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}
