use clap::Parser;
use kumobot::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
