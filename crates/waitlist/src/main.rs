//! Waitlist CLI
//!
//! Binary name: `waitlist`

use std::process;

use waitlist::cli::{build_cli, handlers::dispatch, setup::init_tracing};

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing() {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Warning: {e}");
        }
    }

    let matches = build_cli().get_matches();

    if let Err(err) = dispatch(&matches).await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {err:#}");
        }

        let code = err
            .downcast_ref::<waitlist_core::Error>()
            .map_or(2, waitlist_core::Error::exit_code);

        #[allow(clippy::exit)]
        process::exit(code);
    }
}
