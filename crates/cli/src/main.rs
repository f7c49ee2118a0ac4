use std::process::ExitCode;

fn main() -> ExitCode {
    taskrun_cli::run()
}
