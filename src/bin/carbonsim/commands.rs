use structopt::StructOpt;

use carbonsim::utils::prelude::*;
use carbonsim::SimConfig;

/// Should be implemented by individual subcommand
pub trait Cmd {
    /// Whether the command writes its result to stdout
    fn prints_output(&self) -> bool {
        false
    }

    fn run(self) -> Result<()>;
}

/// Show the effective configuration
#[derive(StructOpt)]
pub struct Config {}

impl Cmd for Config {
    fn prints_output(&self) -> bool {
        true
    }

    fn run(self) -> Result<()> {
        let cfg = SimConfig::fetch()?;
        let dump = serde_yaml::to_string(&cfg).map_err(anyhow::Error::from)?;
        println!("{}", dump);

        Ok(())
    }
}

/// Run the simulation over the configured horizon
#[derive(StructOpt)]
pub struct Run {
    /// Only print the totals instead of every hour
    #[structopt(long)]
    totals: bool,
}

impl Cmd for Run {
    fn prints_output(&self) -> bool {
        true
    }

    fn run(self) -> Result<()> {
        let summary = carbonsim::run_sim()?;
        if self.totals {
            println!("scheduler: {}", summary.scheduler);
            println!("hours: {}", summary.records.len());
            println!("skipped: {}", summary.skipped.len());
            println!("server_hours: {}", summary.server_hours());
            println!("estimated_carbon: {}", summary.total_estimated_carbon());
        } else {
            let dump = serde_yaml::to_string(&summary).map_err(anyhow::Error::from)?;
            println!("{}", dump);
        }

        Ok(())
    }
}
