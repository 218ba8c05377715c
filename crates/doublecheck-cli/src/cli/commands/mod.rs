use super::args::*;
use anyhow::Context;
use doublecheck_core::BrokerConfig;

pub mod config;
pub mod run;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::run(args).await,
        Command::Config(args) => config::run(args),
    }
}

/// File (or defaults), then `DOUBLECHECK_*` environment, then flags.
pub(crate) fn load_config(args: &BrokerArgs) -> anyhow::Result<BrokerConfig> {
    let base = match &args.config {
        Some(path) => BrokerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BrokerConfig::default(),
    };
    let mut cfg = base
        .apply_env()
        .context("applying DOUBLECHECK_* environment overrides")?;

    if let Some(ttl) = &args.ttl {
        if ttl.subsec_nanos() != 0 {
            anyhow::bail!("invalid command-line overrides: --ttl {ttl} is not a whole number of seconds");
        }
        cfg.default_ttl_secs = ttl.as_secs();
    }
    if let Some(interval) = &args.sweep_interval {
        cfg.sweep_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    }
    cfg.validate().context("invalid command-line overrides")?;
    Ok(cfg)
}
