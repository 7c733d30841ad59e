use std::process::ExitCode;

fn main() -> ExitCode {
    capflow_cli::run()
}
