//! Main entry point for the imgtrace CLI application.

use clap::Parser;
use imgtrace::{app::App, cli::Args, error::Result};

fn main() -> Result<()> {
    let args = Args::parse();
    let config = imgtrace::cli::Config::from_args(args)?;
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .format_timestamp(None)
        .init();
    let app = App::new(config);
    app.run()
}
