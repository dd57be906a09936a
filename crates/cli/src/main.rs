use std::process::ExitCode;

fn main() -> ExitCode {
    ledgerly_cli::run()
}
