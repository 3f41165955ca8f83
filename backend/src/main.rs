use std::{error::Error, process::ExitCode};

#[tokio::main]
async fn main() -> ExitCode {
    match unilife::start_server().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&*e);
            ExitCode::FAILURE
        }
    }
}

fn report(error: &(dyn Error + 'static)) {
    eprintln!("unilife-server failed: {error}");

    let mut source = error.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}
