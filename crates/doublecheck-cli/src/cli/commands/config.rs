use super::load_config;
use crate::cli::args::ConfigArgs;
use crate::exit_codes;
use anyhow::Context;

pub fn run(args: ConfigArgs) -> anyhow::Result<i32> {
    let cfg = load_config(&args.broker)?;
    let yaml = serde_yaml::to_string(&cfg).context("rendering effective config")?;
    print!("{yaml}");
    Ok(exit_codes::SUCCESS)
}
