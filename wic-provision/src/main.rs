use std::process::ExitCode;

fn main() -> ExitCode {
    wic_provision::run()
}
