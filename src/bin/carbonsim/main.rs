use carbonsim::utils::{self, prelude::*};
use structopt::StructOpt;

mod cli;
mod commands;

use commands::Cmd;

fn main() -> Result<()> {
    // panic setup should be done early
    utils::panic::setup();
    // basic logging setup, replaced once the configuration is known
    let mut logging = utils::logging::setup()?;

    let args = cli::Cli::from_args();

    utils::app_config::setup()?;
    if let Some(path) = &args.config {
        config_mut().use_file(path)?;
    }
    if let Some(preset) = &args.preset {
        config_mut().use_preset(preset)?;
    }

    logging.reconfigure(args.cmd.prints_output())?;

    trace!("Start cli execution");
    args.cmd.run()
}
