use std::process::ExitCode;

fn main() -> ExitCode {
    finchat_cli::run()
}
