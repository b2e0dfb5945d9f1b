mod args;
mod terminal;

use anyhow::bail;
use args::{CommandLine, Commands, KnockArgs};
use knockr_common::model::Sequence;
use knockr_core::{KnockEngine, RunOutcome};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let commands = CommandLine::parse_args();

    terminal::logging::init();

    match commands.command {
        Commands::Knock(knock) => run(knock).await,
    }
}

async fn run(knock: KnockArgs) -> anyhow::Result<()> {
    let sequence = Sequence {
        id: 1,
        name: knock.host.clone(),
        host: knock.host.clone(),
        steps: knock.steps.clone(),
        delay_ms: knock.delay,
        preference: knock.ipv.into(),
        local_port: knock.local_port,
        ttl: knock.ttl,
        icmp_size_mode: knock.icmp_size_mode.into(),
        resource_check: knock.resource_check(),
    };

    let engine = KnockEngine::with_defaults();
    let handle = engine.start(sequence).await;

    let outcome = tokio::select! {
        outcome = handle.outcome() => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping");
            engine.cancel(1).await;
            RunOutcome::Cancelled
        }
    };

    match outcome {
        RunOutcome::Succeeded => Ok(()),
        RunOutcome::Cancelled => Ok(()),
        RunOutcome::Failed(failure) => bail!(failure),
    }
}
