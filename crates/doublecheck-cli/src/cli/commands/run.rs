use super::load_config;
use crate::cli::args::RunArgs;
use crate::exit_codes;
use crate::host::Host;
use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let cfg = load_config(&args.broker)?;
    let host = Host::new(&cfg, &args.plugins)?;
    info!(
        plugins = ?args.plugins,
        default_ttl_secs = cfg.default_ttl_secs,
        "doublecheck host ready"
    );

    let sweepers: Vec<_> = host.brokers().map(|b| b.spawn_sweeper()).collect();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping.");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                for reply in host.handle_line(&line) {
                    println!("{reply}");
                }
            }
        }
    }

    for sweeper in sweepers {
        sweeper.shutdown().await;
    }
    Ok(exit_codes::SUCCESS)
}
