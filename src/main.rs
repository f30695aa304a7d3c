use std::process::ExitCode;

fn main() -> ExitCode {
    accelcap_lib::run()
}
