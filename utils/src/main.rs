use clap::Parser;
use osmtiles::{defaultlogger::register_messenger_default, message};

use osmtiles_utils::commands::{Cli, Defaults, RunCmd};

fn main() {
    if let Err(e) = register_messenger_default() {
        eprintln!("failed to register messenger: {:?}", e);
    }
    let defaults = Defaults::new();

    let cli = Cli::parse();

    match cli.run(&defaults) {
        Ok(()) => {}
        Err(e) => {
            message!("failed {:?}", e);
            std::process::exit(1);
        }
    }
}
