use std::process::ExitCode;

fn main() -> ExitCode {
    prsync_cli::run()
}
