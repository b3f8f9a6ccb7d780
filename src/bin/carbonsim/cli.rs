use std::path::PathBuf;

use structopt::clap::AppSettings;
use structopt::StructOpt;

use crate::commands::{self, Cmd};
use carbonsim::Result;

#[derive(StructOpt)]
#[structopt(global_settings = &[AppSettings::VersionlessSubcommands, AppSettings::ColoredHelp])]
pub struct Cli {
    /// Set a custom config file
    #[structopt(short, long, parse(from_os_str), value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Apply a named preset from the `presets` table
    #[structopt(short, long, value_name = "NAME")]
    pub preset: Option<String>,

    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt)]
pub enum Command {
    Config(commands::Config),
    Run(commands::Run),
}

impl Cmd for Command {
    fn prints_output(&self) -> bool {
        match self {
            Command::Config(c) => c.prints_output(),
            Command::Run(c) => c.prints_output(),
        }
    }

    fn run(self) -> Result<()> {
        match self {
            Command::Config(c) => c.run(),
            Command::Run(c) => c.run(),
        }
    }
}
