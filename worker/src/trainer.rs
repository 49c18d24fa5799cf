use std::time::{Duration, Instant};

use log::{debug, info};
use machine_learning::{
    Gpt,
    optimization::{AdamW, Optimizer, clip_grad_norm},
    sampling::generate,
};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    accumulation::AccumulationWindow,
    comm::Communicator,
    config::{TrainingConfig, TrainingPlan},
    context::RuntimeContext,
    data::ShardedLoader,
    error::Result,
    metrics::{TrainMetrics, tokens_per_sec},
};

/// What one optimizer step did, as seen by every rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: usize,
    /// Mean training loss of the window, averaged across ranks.
    pub loss: f32,
    pub lr: f32,
    /// Global gradient norm before clipping.
    pub grad_norm: f32,
    pub duration: Duration,
    pub tokens_per_sec: f64,
}

/// Drives the step loop of one rank.
pub struct Trainer {
    ctx: RuntimeContext,
    config: TrainingConfig,
    plan: TrainingPlan,
    window: AccumulationWindow,
    model: Gpt,
    optimizer: AdamW,
    train_loader: ShardedLoader,
    val_loader: Option<ShardedLoader>,
    comm: Box<dyn Communicator>,
    metrics: TrainMetrics,
    step: usize,
}

impl Trainer {
    /// Use `TrainerBuilder` instead.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: RuntimeContext,
        config: TrainingConfig,
        plan: TrainingPlan,
        model: Gpt,
        optimizer: AdamW,
        train_loader: ShardedLoader,
        val_loader: Option<ShardedLoader>,
        comm: Box<dyn Communicator>,
    ) -> Self {
        Self {
            ctx,
            config,
            window: AccumulationWindow::new(plan.accumulation_steps),
            plan,
            model,
            optimizer,
            train_loader,
            val_loader,
            comm,
            metrics: TrainMetrics::default(),
            step: 0,
        }
    }

    pub fn model(&self) -> &Gpt {
        &self.model
    }

    pub fn metrics(&self) -> &TrainMetrics {
        &self.metrics
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Runs every remaining step, with validation and sampling at their
    /// cadence, then disconnects from the group.
    ///
    /// # Returns
    /// The cumulative metrics of this rank.
    pub async fn run(&mut self) -> Result<TrainMetrics> {
        self.sync_params().await?;

        let max_steps = self.plan.schedule.max_steps();
        if self.ctx.is_master() {
            info!(
                world_size = self.ctx.world_size,
                accumulation_steps = self.window.micro_steps(),
                max_steps = max_steps;
                "training"
            );
        }

        while self.step < max_steps {
            let step = self.step;

            let eval_every = self.config.eval_interval;
            if eval_every > 0 && step % eval_every == 0 {
                self.evaluate().await?;
            }

            let sample_every = self.config.sampling.interval;
            if sample_every > 0 && step > 0 && step % sample_every == 0 {
                self.sample()?;
            }

            self.train_step().await?;
        }

        self.comm.finish().await?;
        Ok(self.metrics.clone())
    }

    /// Broadcasts rank 0's parameters so every replica starts identical.
    pub async fn sync_params(&mut self) -> Result<()> {
        self.comm.broadcast(self.model.params_mut()).await
    }

    /// One optimizer step over a full accumulation window.
    pub async fn train_step(&mut self) -> Result<StepReport> {
        let start = Instant::now();
        let scale = self.window.loss_scale();

        self.model.train();
        self.model.zero_grad();

        let mut loss_accum = 0.0;
        for micro_step in 0..self.window.micro_steps() {
            let compute = Instant::now();
            let batch = self.train_loader.next_batch()?;
            let loss = self
                .model
                .loss(batch.inputs.view(), batch.targets.view())?;
            self.model.backward(scale)?;
            loss_accum += loss * scale;
            self.metrics.compute_time += compute.elapsed();

            if self.window.should_sync(micro_step) {
                let sync = Instant::now();
                self.comm.all_reduce_mean(self.model.grad_mut()).await?;
                self.metrics.sync_time += sync.elapsed();
            }
        }

        let loss = self.comm.mean_scalar(loss_accum).await?;
        let grad_norm = clip_grad_norm(self.model.grad_mut(), self.config.grad_clip);

        let lr = self.plan.schedule.lr(self.step);
        self.optimizer.set_learning_rate(lr);
        let (params, grad) = self.model.store_mut().buffers_mut();
        self.optimizer.update_params(grad, params)?;
        self.model.zero_grad();

        let duration = start.elapsed();
        let tokens = self.plan.micro_tokens * self.window.micro_steps() * self.ctx.world_size;
        let report = StepReport {
            step: self.step,
            loss,
            lr,
            grad_norm,
            duration,
            tokens_per_sec: tokens_per_sec(tokens, duration),
        };

        self.metrics.bump_step();
        self.metrics.add_microbatches(self.window.micro_steps());
        self.metrics
            .add_tokens(self.plan.micro_tokens * self.window.micro_steps());
        self.step += 1;

        if self.ctx.is_master() {
            info!(
                step = report.step,
                loss = report.loss,
                lr = report.lr,
                norm = report.grad_norm,
                dt_ms = duration.as_secs_f64() * 1e3,
                tok_per_sec = report.tokens_per_sec;
                "step"
            );
        }

        Ok(report)
    }

    /// Mean validation loss over `val_steps` batches from the start of the
    /// split, averaged across ranks. `None` without a validation split.
    pub async fn evaluate(&mut self) -> Result<Option<f32>> {
        let Some(loader) = self.val_loader.as_mut() else {
            return Ok(None);
        };

        self.model.eval();
        loader.reset()?;

        let val_steps = self.config.val_steps;
        let mut loss_accum = 0.0;
        for _ in 0..val_steps {
            let batch = loader.next_batch()?;
            let loss = self
                .model
                .loss(batch.inputs.view(), batch.targets.view())?;
            loss_accum += loss / val_steps as f32;
        }
        self.model.train();

        let val_loss = self.comm.mean_scalar(loss_accum).await?;
        if self.ctx.is_master() {
            info!(step = self.step, val_loss = val_loss; "validation");
        }

        Ok(Some(val_loss))
    }

    /// Draws continuations of the configured prompt with this rank's seed.
    pub fn sample(&mut self) -> Result<Vec<Vec<u32>>> {
        let sampling = &self.config.sampling;
        let mut rng = StdRng::seed_from_u64(sampling.seed + self.ctx.rank as u64);

        self.model.eval();
        let sequences = generate(&mut self.model, &sampling.prompt, &sampling.spec(), &mut rng);
        self.model.train();
        let sequences = sequences?;

        for (i, tokens) in sequences.iter().enumerate() {
            info!(rank = self.ctx.rank, sample = i; "{tokens:?}");
        }
        debug!(step = self.step; "sampled {} sequences", sequences.len());

        Ok(sequences)
    }
}
