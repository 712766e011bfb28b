//! Single-step training and evaluation of a model against its loss.

use super::{Result, TrainError};
use crate::data::Batch;
use crate::losses::{Accuracy, CrossEntropyLoss};
use crate::metrics::RunningMean;
use crate::nn::{Branch, Context, Layer, LayerError, Serial, Weights};
use crate::optimizers::{clip_grad_norm, global_norm, Optimizer};
use crate::schedules::Schedule;
use crate::serial;
use crate::serialization::{
    load_checkpoint, save_checkpoint, Checkpoint, CheckpointMetadata, OptimizerState,
};
use crate::shapes::ShapeDtype;
use crate::tensor::{self, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// What one call to [`Trainer::train_step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// 1-based number of the step just taken.
    pub step: usize,
    pub loss: f32,
    pub learning_rate: f32,
    /// Global gradient norm before clipping.
    pub grad_norm: f32,
}

/// Weighted means over a set of eval batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub batches: usize,
}

/// Trains a model on `(inputs, targets, weights)` batches.
///
/// The train layer is `Serial(model, CrossEntropyLoss::weighted())` and the
/// eval layer is `Serial(model, Branch(CrossEntropyLoss::weighted(),
/// Accuracy::weighted()))`. Both hold the same model, and the model weights
/// are stored once, as child 0 of the train weights.
#[derive(Debug)]
pub struct Trainer {
    model: Arc<dyn Layer>,
    train_layer: Serial,
    eval_layer: Serial,
    optimizer: Box<dyn Optimizer>,
    schedule: Box<dyn Schedule>,
    weights: Weights,
    metric_weights: Weights,
    slots: Vec<Weights>,
    step: usize,
    seed: u64,
    clip_grad_norm: Option<f32>,
    last_loss: Option<f32>,
    last_learning_rate: f32,
    last_eval: Option<EvalMetrics>,
}

fn scalar_output(outputs: &[Tensor], index: usize) -> Result<f32> {
    outputs
        .get(index)
        .and_then(|t| t.iter().next().copied())
        .ok_or_else(|| {
            TrainError::Layer(LayerError::InvalidArgument(format!(
                "expected a scalar at output {}",
                index
            )))
        })
}

fn model_child(weights: &mut Weights) -> Result<&mut Weights> {
    weights.children.get_mut(0).ok_or_else(|| {
        TrainError::Layer(LayerError::WeightsStructure(
            "train weights have no model child".to_string(),
        ))
    })
}

impl Trainer {
    /// Initializes the model for `input_signature` (usually
    /// [`batch_signature`](crate::data::batch_signature)) with `seed`.
    pub fn new(
        model: Box<dyn Layer>,
        optimizer: Box<dyn Optimizer>,
        schedule: Box<dyn Schedule>,
        input_signature: &[ShapeDtype],
        seed: u64,
    ) -> Result<Self> {
        let model: Arc<dyn Layer> = Arc::from(model);
        let train_layer = serial![Arc::clone(&model), CrossEntropyLoss::weighted()];
        let metrics = Branch::new(vec![
            Box::new(CrossEntropyLoss::weighted()) as Box<dyn Layer>,
            Box::new(Accuracy::weighted()),
        ]);
        let eval_layer = serial![Arc::clone(&model), metrics];

        let mut rng = StdRng::seed_from_u64(seed);
        let (weights, _) = train_layer.init(input_signature, &mut rng)?;
        let (eval_weights, _) = eval_layer.init(input_signature, &mut rng)?;
        let metric_weights = eval_weights.child(1)?.clone();
        let slots = optimizer.init_slots(&weights);

        debug!(
            model = model.name(),
            parameters = weights.size(),
            optimizer = optimizer.name(),
            "trainer initialized"
        );
        Ok(Self {
            model,
            train_layer,
            eval_layer,
            optimizer,
            schedule,
            weights,
            metric_weights,
            slots,
            step: 0,
            seed,
            clip_grad_norm: None,
            last_loss: None,
            last_learning_rate: 0.0,
            last_eval: None,
        })
    }

    /// Rescale gradients to at most this global norm before each update.
    pub fn with_clip_grad_norm(mut self, max_norm: Option<f32>) -> Self {
        self.clip_grad_norm = max_norm;
        self
    }

    pub fn model(&self) -> &dyn Layer {
        self.model.as_ref()
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Number of completed training steps.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.last_loss
    }

    pub fn last_eval(&self) -> Option<EvalMetrics> {
        self.last_eval
    }

    pub fn model_weights(&self) -> Result<&Weights> {
        Ok(self.weights.child(0)?)
    }

    /// Replaces the model weights; the tree must match the current one.
    pub fn set_model_weights(&mut self, weights: Weights) -> Result<()> {
        let current = model_child(&mut self.weights)?;
        if !current.same_structure(&weights) {
            return Err(LayerError::WeightsStructure(
                "new model weights differ in structure".to_string(),
            )
            .into());
        }
        *current = weights;
        Ok(())
    }

    /// Runs forward and backward on `batch` and applies one optimizer update.
    ///
    /// The learning rate is `schedule(step)` for the 1-based number of this
    /// step. A non-finite loss aborts the step before any weight changes.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepOutput> {
        let step = self.step + 1;
        let inputs = batch.clone().into_stack();
        let mut ctx = Context::train(self.seed.wrapping_add(step as u64));
        let (outputs, cache) = self.train_layer.forward(&inputs, &self.weights, &mut ctx)?;
        let loss = scalar_output(&outputs, 0)?;
        if !loss.is_finite() {
            return Err(TrainError::NonFiniteLoss { step, loss });
        }

        let (_, mut grads) = self
            .train_layer
            .backward(&cache, &self.weights, &[tensor::scalar(1.0)])?;
        let grad_norm = match self.clip_grad_norm {
            Some(max_norm) => clip_grad_norm(&mut grads, max_norm),
            None => global_norm(&grads),
        };
        let learning_rate = self.schedule.learning_rate(step);
        self.optimizer.update(
            step,
            learning_rate,
            &mut self.weights,
            &grads,
            &mut self.slots,
        )?;

        self.step = step;
        self.last_loss = Some(loss);
        self.last_learning_rate = learning_rate;
        debug!(step, loss, learning_rate, grad_norm, "train step");
        Ok(StepOutput {
            step,
            loss,
            learning_rate,
            grad_norm,
        })
    }

    /// Loss and accuracy over `batches` in eval mode, each batch weighted
    /// by its total loss weight.
    pub fn evaluate<I>(&mut self, batches: I) -> Result<EvalMetrics>
    where
        I: IntoIterator<Item = Batch>,
    {
        let weights = Weights::node(vec![
            self.model_weights()?.clone(),
            self.metric_weights.clone(),
        ]);
        let mut loss = RunningMean::new();
        let mut accuracy = RunningMean::new();
        let mut count = 0;
        for batch in batches {
            let weight = batch.total_weight() as f64;
            let mut ctx = Context::eval();
            let (outputs, _) = self
                .eval_layer
                .forward(&batch.into_stack(), &weights, &mut ctx)?;
            loss.update_weighted(scalar_output(&outputs, 0)? as f64, weight);
            accuracy.update_weighted(scalar_output(&outputs, 1)? as f64, weight);
            count += 1;
        }

        let metrics = EvalMetrics {
            loss: loss.compute(),
            accuracy: accuracy.compute(),
            batches: count,
        };
        self.last_eval = Some(metrics);
        Ok(metrics)
    }

    /// Snapshot of the model weights, optimizer slots and progress.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        let mut metadata = CheckpointMetadata::new()
            .with_model_name(self.model.name())
            .with_step(self.step)
            .with_learning_rate(self.last_learning_rate)
            .with_metadata("optimizer", self.optimizer.name());
        if let Some(loss) = self.last_loss {
            metadata = metadata.with_last_loss(loss);
        }
        if let Some(eval) = self.last_eval {
            metadata = metadata.with_eval_loss(eval.loss as f32);
        }

        let slot_names = self.optimizer.slot_names();
        let mut slots = HashMap::new();
        for (name, slot) in slot_names.iter().zip(&self.slots) {
            for (path, t) in slot.child(0)?.to_named() {
                slots.insert(format!("{}/{}", name, path), t);
            }
        }
        let state = OptimizerState {
            optimizer_type: self.optimizer.name().to_string(),
            params: self.optimizer.hyperparameters(),
            slot_names: slot_names.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Checkpoint::new(self.model_weights()?.to_named(), metadata)
            .with_optimizer_state(state, slots))
    }

    pub fn save_checkpoint<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        save_checkpoint(dir, &self.checkpoint()?)?;
        Ok(())
    }

    pub fn restore_checkpoint<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let checkpoint = load_checkpoint(dir)?;
        self.restore(&checkpoint)
    }

    /// Loads weights, slots and step from `checkpoint`.
    ///
    /// Eval metrics from before the restore are dropped. Slots saved by a different optimizer are discarded with a warning and
    /// start from zero. Nothing changes if the model weights fail to load.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let mut weights = self.weights.clone();
        model_child(&mut weights)?
            .load_named(&checkpoint.model_weights)
            .map_err(|e| TrainError::IncompatibleCheckpoint(format!("model: {}", e)))?;

        let slot_names = self.optimizer.slot_names();
        let mut slots = self.optimizer.init_slots(&weights);
        match &checkpoint.optimizer_state {
            Some(state)
                if state.optimizer_type == self.optimizer.name()
                    && state.slot_names.iter().map(String::as_str).eq(slot_names.iter().copied()) =>
            {
                for (name, slot) in slot_names.iter().zip(slots.iter_mut()) {
                    let prefix = format!("{}/", name);
                    let named: HashMap<String, Tensor> = checkpoint
                        .optimizer_slots
                        .iter()
                        .filter_map(|(k, v)| {
                            k.strip_prefix(&prefix).map(|p| (p.to_string(), v.clone()))
                        })
                        .collect();
                    model_child(slot)?.load_named(&named).map_err(|e| {
                        TrainError::IncompatibleCheckpoint(format!("slot '{}': {}", name, e))
                    })?;
                }
            }
            Some(state) => warn!(
                saved = %state.optimizer_type,
                current = self.optimizer.name(),
                "checkpoint optimizer differs, resetting optimizer slots"
            ),
            None => {}
        }

        self.weights = weights;
        self.slots = slots;
        self.step = checkpoint.metadata.step;
        self.last_loss = checkpoint.metadata.last_loss;
        self.last_learning_rate = checkpoint.metadata.learning_rate;
        self.last_eval = None;
        Ok(())
    }
}
