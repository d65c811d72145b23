use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use harpoon::{codec, listing, ConvertOptions, TargetConfig};

#[derive(Parser)]
#[command(
    name = "harpoon",
    version,
    about = "Narwhal NPU model compiler — decode, rewrite, re-encode."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a model artifact for the NPU
    Build {
        /// Input model artifact
        input: PathBuf,
        /// Output path (default: input with the target's extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Target NPU (built-in or npu/{name}.toml)
        #[arg(long, default_value = "narwhal")]
        target: String,
        /// Skip the per-pass invariant checks
        #[arg(long)]
        no_verify: bool,
        /// Print the final operator listing and per-pass counts
        #[arg(long)]
        summary: bool,
    },
    /// Decode an artifact and sanity-check it without converting
    Check {
        /// Input model artifact
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build {
            input,
            output,
            target,
            no_verify,
            summary,
        } => {
            let target = TargetConfig::resolve(&target)?;
            let artifact = std::fs::read(&input)?;
            let options = ConvertOptions {
                target: target.clone(),
                verify: !no_verify,
            };
            let (bytes, reports) = harpoon::convert_with_reports(&artifact, &options)?;
            let output = output.unwrap_or_else(|| default_output(&input, &target));
            std::fs::write(&output, &bytes)?;

            if summary {
                for report in &reports {
                    println!("{:<28} {:>5} rewrite(s)", report.pass, report.applied);
                }
                let model = codec::decode(&bytes)?;
                print!("{}", listing::render(&model));
            }
            println!(
                "compiled {} -> {} ({} bytes)",
                input.display(),
                output.display(),
                bytes.len()
            );
            Ok(())
        }
        Command::Check { input } => {
            let artifact = std::fs::read(&input)?;
            let model = codec::decode(&artifact)?;
            model.sanity_check()?;
            print!("{}", listing::render(&model));
            println!(
                "ok: {} operator(s), {} tensor(s), {} buffer(s), {} data byte(s)",
                model.operator_count(),
                model.tensor_count(),
                model.buffer_count(),
                model.data_size()
            );
            Ok(())
        }
    }
}

fn default_output(input: &Path, target: &TargetConfig) -> PathBuf {
    let ext = target.output_extension.trim_start_matches('.');
    input.with_extension(ext)
}
