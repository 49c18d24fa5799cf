use machine_learning::{
    Gpt,
    optimization::{AdamW, AdamWConfig, decay_groups},
};

use crate::{
    Trainer,
    comm::{Communicator, Solo},
    config::TrainingConfig,
    context::RuntimeContext,
    data::{Corpus, ShardedLoader},
    error::{Result, WorkerErr},
};

/// Assembles a `Trainer` from a config and a process group.
///
/// Anything not provided explicitly is derived from the config: corpora are
/// discovered under `data_dir` and the model is initialized from `seed`.
pub struct TrainerBuilder {
    ctx: RuntimeContext,
    config: TrainingConfig,
    comm: Option<Box<dyn Communicator>>,
    train_corpus: Option<Corpus>,
    val_corpus: Option<Corpus>,
    model: Option<Gpt>,
}

impl TrainerBuilder {
    pub fn new(ctx: RuntimeContext, config: TrainingConfig) -> Self {
        Self {
            ctx,
            config,
            comm: None,
            train_corpus: None,
            val_corpus: None,
            model: None,
        }
    }

    pub fn communicator(mut self, comm: Box<dyn Communicator>) -> Self {
        self.comm = Some(comm);
        self
    }

    pub fn train_corpus(mut self, corpus: Corpus) -> Self {
        self.train_corpus = Some(corpus);
        self
    }

    pub fn val_corpus(mut self, corpus: Corpus) -> Self {
        self.val_corpus = Some(corpus);
        self
    }

    /// Starts from an existing model, e.g. imported pretrained weights.
    pub fn model(mut self, model: Gpt) -> Self {
        self.model = Some(model);
        self
    }

    /// Validates the config and builds every component.
    ///
    /// # Errors
    /// Any configuration error, missing shards, or a communicator whose group
    /// does not match the runtime context.
    pub fn build(self) -> Result<Trainer> {
        let Self {
            ctx,
            config,
            comm,
            train_corpus,
            val_corpus,
            model,
        } = self;

        let plan = config.plan(ctx.world_size)?;

        let comm: Box<dyn Communicator> = match comm {
            Some(comm) => comm,
            None if ctx.world_size == 1 => Box::new(Solo),
            None => {
                return Err(WorkerErr::Config(format!(
                    "a world of {} workers needs a communicator",
                    ctx.world_size
                )));
            }
        };
        if comm.rank() != ctx.rank || comm.world_size() != ctx.world_size {
            return Err(WorkerErr::Config(format!(
                "communicator is rank {} of {} but the context says rank {} of {}",
                comm.rank(),
                comm.world_size(),
                ctx.rank,
                ctx.world_size
            )));
        }

        let model = match model {
            Some(model) if *model.config() == config.gpt_config() => model,
            Some(model) => {
                return Err(WorkerErr::Config(format!(
                    "model {:?} does not match the configured {:?}",
                    model.config(),
                    config.gpt_config()
                )));
            }
            None => Gpt::new(config.gpt_config(), config.seed)?,
        };

        let groups = decay_groups(model.store(), config.weight_decay);
        let optimizer = AdamW::new(
            model.num_params(),
            groups.to_vec(),
            AdamWConfig {
                lr: config.max_lr,
                ..AdamWConfig::default()
            },
        )?;

        let loader = |corpus: Corpus| {
            ShardedLoader::new(
                corpus,
                config.micro_batch,
                config.seq_len,
                ctx.rank,
                ctx.world_size,
            )
        };

        let train_corpus = match train_corpus {
            Some(corpus) => corpus,
            None => Corpus::discover(&config.data_dir, &config.train_split)?,
        };
        let train_loader = loader(train_corpus)?;

        let val_loader = match val_corpus {
            Some(corpus) => Some(loader(corpus)?),
            None if config.eval_interval > 0 => Some(loader(Corpus::discover(
                &config.data_dir,
                &config.val_split,
            )?)?),
            None => None,
        };

        Ok(Trainer::new(
            ctx,
            config,
            plan,
            model,
            optimizer,
            train_loader,
            val_loader,
            comm,
        ))
    }
}
