use std::process::ExitCode;

fn main() -> ExitCode {
    match rolehostd::run_host() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("rolehostd: {error}");
            ExitCode::FAILURE
        }
    }
}
