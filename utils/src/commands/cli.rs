use clap::{Parser, Subcommand};

use crate::commands::{Defaults, LongLongBench, Render, RunCmd, SortBench};
use crate::error::Result;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// sorts random entries with the external merge sort and reports throughput
    Sortbench(SortBench),
    /// writes and reads back a long long map and reports throughput
    Longlongbench(LongLongBench),
    /// sorts random features into tiles and writes them to a tile file
    Render(Render),
}

impl RunCmd for Cli {
    fn run(&self, defaults: &Defaults) -> Result<()> {
        match &self.command {
            Commands::Sortbench(c) => c.run(defaults),
            Commands::Longlongbench(c) => c.run(defaults),
            Commands::Render(c) => c.run(defaults),
        }
    }
}
