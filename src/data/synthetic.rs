// --- File: src/data/synthetic.rs ---

//! Synthetic translation task.
//!
//! Each source token maps to a fixed target token, so a position-wise model
//! can learn the task exactly. That makes the stream useful for smoke tests
//! and for checking that training actually reduces the loss.

use super::batch::Batch;
use crate::config::{InputsConfig, ModelConfig};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Padding id; positions holding it get weight 0.
pub const PAD_ID: usize = 0;

/// Target id that `source_id` translates to.
///
/// Ids lie in `1..output_vocab_size`, so padding is never a target.
pub fn target_id(source_id: usize, output_vocab_size: usize) -> usize {
    1 + (7 * source_id + 3) % output_vocab_size.saturating_sub(1).max(1)
}

/// Infinite, seeded stream of padded `[batch_size, max_length]` batches.
#[derive(Debug, Clone)]
pub struct SyntheticTranslation {
    input_vocab_size: usize,
    output_vocab_size: usize,
    min_length: usize,
    max_length: usize,
    batch_size: usize,
    rng: StdRng,
}

impl SyntheticTranslation {
    pub fn new(
        input_vocab_size: usize,
        output_vocab_size: usize,
        min_length: usize,
        max_length: usize,
        batch_size: usize,
        seed: u64,
    ) -> Self {
        Self {
            input_vocab_size: input_vocab_size.max(2),
            output_vocab_size: output_vocab_size.max(2),
            min_length: min_length.max(1).min(max_length.max(1)),
            max_length: max_length.max(1),
            batch_size,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(inputs: &InputsConfig, model: &ModelConfig, batch_size: usize, seed: u64) -> Self {
        Self::new(
            model.input_vocab_size,
            model.output_vocab_size,
            inputs.min_length,
            inputs.max_length,
            batch_size,
            seed,
        )
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn next_batch(&mut self) -> Batch {
        let shape = (self.batch_size, self.max_length);
        let mut inputs = Array2::<f32>::zeros(shape);
        let mut targets = Array2::<f32>::zeros(shape);
        let mut weights = Array2::<f32>::zeros(shape);
        for row in 0..self.batch_size {
            let length = self.rng.gen_range(self.min_length..=self.max_length);
            for col in 0..length {
                let source = self.rng.gen_range(1..self.input_vocab_size);
                inputs[[row, col]] = source as f32;
                targets[[row, col]] = target_id(source, self.output_vocab_size) as f32;
                weights[[row, col]] = 1.0;
            }
        }
        Batch {
            inputs: inputs.into_dyn(),
            targets: targets.into_dyn(),
            weights: weights.into_dyn(),
        }
    }
}

impl Iterator for SyntheticTranslation {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        Some(self.next_batch())
    }
}

/// Train and eval streams for a run.
pub struct Inputs {
    pub train_stream: Box<dyn Iterator<Item = Batch> + Send>,
    pub eval_stream: Box<dyn Iterator<Item = Batch> + Send>,
}

impl Inputs {
    pub fn new(
        train_stream: impl Iterator<Item = Batch> + Send + 'static,
        eval_stream: impl Iterator<Item = Batch> + Send + 'static,
    ) -> Self {
        Self {
            train_stream: Box::new(train_stream),
            eval_stream: Box::new(eval_stream),
        }
    }

    /// Synthetic train and eval streams with distinct seeds derived from `seed`.
    pub fn synthetic(inputs: &InputsConfig, model: &ModelConfig, seed: u64) -> Self {
        Self::new(
            SyntheticTranslation::from_config(inputs, model, inputs.batch_size, seed),
            SyntheticTranslation::from_config(
                inputs,
                model,
                inputs.eval_batch_size,
                seed.wrapping_add(1),
            ),
        )
    }
}

impl std::fmt::Debug for Inputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inputs").finish_non_exhaustive()
    }
}
