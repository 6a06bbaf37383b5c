use std::process::ExitCode;

fn main() -> ExitCode {
    match brokerd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("brokerd: {error}");
            ExitCode::FAILURE
        }
    }
}
