//! The full training run behind `layerstack train`.

use super::trainer::{EvalMetrics, Trainer};
use super::{Result, TrainError};
use crate::config::Config;
use crate::data::{batch_signature, Inputs};
use crate::metrics::MetricLogger;
use crate::models::positionwise_seq2seq;
use crate::nn::Mode;
use crate::serialization::CheckpointManager;
use std::path::PathBuf;
use tracing::{info, warn};

/// Outcome of [`train`].
#[derive(Debug, Clone)]
pub struct TrainSummary {
    /// Completed steps, including any restored from a checkpoint.
    pub steps: usize,
    pub final_loss: Option<f32>,
    pub eval: Option<EvalMetrics>,
    pub checkpoint: Option<PathBuf>,
    /// Window means of `loss`, `learning_rate`, `grad_norm`, `eval_loss` and
    /// `eval_accuracy`, filed at every eval step.
    pub history: MetricLogger,
}

/// True when `step` falls on a positive `frequency`.
fn due(step: usize, frequency: usize) -> bool {
    frequency > 0 && step % frequency == 0
}

/// Trains the seq2seq model described by `config` on `inputs`.
///
/// Resumes from the newest checkpoint in `config.train.output_dir` if there
/// is one, evaluates every `eval_frequency` steps and checkpoints every
/// `checkpoint_frequency` steps. The last step always evaluates and
/// checkpoints.
pub fn train(config: &Config, mut inputs: Inputs) -> Result<TrainSummary> {
    config.validate()?;
    let settings = &config.train;

    let model = positionwise_seq2seq(&config.model, Mode::Train)?;
    let signature = batch_signature(config.inputs.batch_size, config.inputs.max_length);
    let mut trainer = Trainer::new(
        Box::new(model),
        config.optimizer.build(),
        Box::new(config.lr_schedule.build()?),
        &signature,
        settings.seed,
    )?
    .with_clip_grad_norm(config.optimizer.clip_grad_norm);

    let manager = CheckpointManager::new(&settings.output_dir, settings.checkpoints_to_keep);
    if let Some(path) = manager.latest_path()? {
        trainer.restore_checkpoint(&path)?;
        info!(step = trainer.step(), path = %path.display(), "resumed from checkpoint");
    }
    info!(
        model = trainer.model().name(),
        parameters = trainer.model_weights()?.size(),
        optimizer = trainer.optimizer().name(),
        steps = settings.steps,
        "starting training"
    );

    let mut history = MetricLogger::new();
    let mut checkpoint = None;
    let start = trainer.step();
    while trainer.step() < settings.steps {
        let batch = inputs
            .train_stream
            .next()
            .ok_or(TrainError::StreamExhausted(trainer.step() - start))?;
        let out = trainer.train_step(&batch)?;
        history.log("loss", out.loss as f64);
        history.log("learning_rate", out.learning_rate as f64);
        history.log("grad_norm", out.grad_norm as f64);

        let step = out.step;
        let last = step == settings.steps;
        if last || due(step, settings.eval_frequency) {
            let eval = trainer.evaluate(inputs.eval_stream.by_ref().take(settings.eval_steps))?;
            if eval.batches > 0 {
                history.log("eval_loss", eval.loss);
                history.log("eval_accuracy", eval.accuracy);
            } else {
                warn!(step, "eval stream produced no batches");
            }
            history.end_step(step);
            info!("{}", history.format_step(step));
        }
        if last || due(step, settings.checkpoint_frequency) {
            let path = manager.save(&trainer.checkpoint()?)?;
            info!(step, path = %path.display(), "saved checkpoint");
            checkpoint = Some(path);
        }
    }

    info!(
        steps = trainer.step(),
        loss = ?trainer.last_loss(),
        "training finished"
    );
    Ok(TrainSummary {
        steps: trainer.step(),
        final_loss: trainer.last_loss(),
        eval: trainer.last_eval(),
        checkpoint,
        history,
    })
}
