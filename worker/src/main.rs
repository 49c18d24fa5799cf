use std::{io, time::Duration};

use log::{info, warn};
use tokio::signal;

use worker::{
    RuntimeContext, TrainerBuilder, TrainingConfig,
    comm::{self, Communicator, Solo},
};

const RENDEZVOUS_DEADLINE: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let ctx = RuntimeContext::from_env()?;
    let config = TrainingConfig::from_env()?;
    // fail on a bad config before waiting on peers
    config.plan(ctx.world_size)?;

    info!(
        rank = ctx.rank,
        world_size = ctx.world_size,
        device = ctx.device.to_string().as_str();
        "starting worker"
    );

    let comm: Box<dyn Communicator> = if !ctx.is_distributed() {
        Box::new(Solo)
    } else if ctx.is_master() {
        Box::new(comm::listen(&ctx).await?)
    } else {
        Box::new(comm::connect(&ctx, RENDEZVOUS_DEADLINE).await?)
    };

    let mut trainer = TrainerBuilder::new(ctx, config)
        .communicator(comm)
        .build()?;

    tokio::select! {
        ret = trainer.run() => {
            let metrics = ret?;
            info!(
                steps = metrics.steps,
                tokens = metrics.tokens,
                compute_s = metrics.compute_time.as_secs_f64(),
                sync_s = metrics.sync_time.as_secs_f64();
                "training finished"
            );
        }
        _ = signal::ctrl_c() => {
            warn!("received SIGINT, aborting");
        }
    }

    Ok(())
}
