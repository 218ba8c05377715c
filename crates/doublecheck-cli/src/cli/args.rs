use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "doublecheck",
    version,
    about = "Ask before acting: time-bounded confirm/deny prompts resolved exactly once"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read `<actor> <command> [argument]` lines from stdin and answer on stdout
    Run(RunArgs),
    /// Validate a config file and print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct BrokerArgs {
    /// YAML config file (defaults apply when omitted)
    #[arg(long, short = 'c', env = "DOUBLECHECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default request TTL, e.g. "15s" (overrides config and environment)
    #[arg(long)]
    pub ttl: Option<humantime::Duration>,

    /// Background sweep period, e.g. "250ms"
    #[arg(long)]
    pub sweep_interval: Option<humantime::Duration>,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Broker instance to host; repeat to run sibling brokers on one
    /// occupation bus. The first one receives `ask` by default.
    #[arg(long = "plugin", value_name = "NAME", default_value = "main")]
    pub plugins: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub broker: BrokerArgs,
}
