//! Ready-made models assembled from layers and combinators.

use crate::config::ModelConfig;
use crate::nn::module::{Layer, Mode, Result};
use crate::nn::{log_softmax, relu, Dense, Dropout, Embedding, LayerNorm, Residual, Serial};

/// Multi-layer perceptron: `Dense(h) -> Relu` per hidden size, then
/// `Dense(n_classes) -> LogSoftmax`.
pub fn mlp(hidden: &[usize], n_classes: usize) -> Serial {
    let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(2 * hidden.len() + 2);
    for &units in hidden {
        layers.push(Box::new(Dense::new(units)));
        layers.push(Box::new(relu()));
    }
    layers.push(Box::new(Dense::new(n_classes)));
    layers.push(Box::new(log_softmax()));
    Serial::new(layers)
}

/// Token-to-token model applying the same residual feed-forward blocks at
/// every position.
///
/// Takes `[batch, length]` ids and returns `[batch, length, output_vocab_size]`
/// log-probabilities. Dropout layers are built with rate 0 outside
/// [`Mode::Train`], so weights are interchangeable between modes.
pub fn positionwise_seq2seq(config: &ModelConfig, mode: Mode) -> Result<Serial> {
    let rate = if mode == Mode::Train { config.dropout } else { 0.0 };

    let mut layers: Vec<Box<dyn Layer>> = vec![
        Box::new(Embedding::new(config.input_vocab_size, config.d_model)),
        Box::new(Dropout::new(rate)?),
    ];
    for _ in 0..config.n_layers {
        layers.push(Box::new(feed_forward_block(config.d_model, config.d_ff, rate)?));
    }
    layers.push(Box::new(LayerNorm::new()));
    layers.push(Box::new(Dense::new(config.output_vocab_size)));
    layers.push(Box::new(log_softmax()));
    Ok(Serial::new(layers))
}

/// `Residual(LayerNorm, Dense(d_ff), Relu, Dropout, Dense(d_model), Dropout)`.
pub fn feed_forward_block(d_model: usize, d_ff: usize, dropout: f32) -> Result<Residual> {
    Ok(Residual::new(vec![
        Box::new(LayerNorm::new()),
        Box::new(Dense::new(d_ff)),
        Box::new(relu()),
        Box::new(Dropout::new(dropout)?),
        Box::new(Dense::new(d_model)),
        Box::new(Dropout::new(dropout)?),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::ShapeDtype;
    use crate::tensor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mlp_shapes() {
        let model = mlp(&[8, 8], 3);
        assert_eq!(model.len(), 6);
        let mut rng = StdRng::seed_from_u64(0);
        let (w, out) = model.init(&[ShapeDtype::f32([5, 4])], &mut rng).unwrap();
        assert_eq!(out, vec![ShapeDtype::f32([5, 3])]);
        let probs = model.apply(&[tensor::ones(&[5, 4])], &w).unwrap()[0].mapv(f32::exp);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_seq2seq_signature() {
        let config = ModelConfig {
            d_model: 8,
            d_ff: 16,
            n_layers: 2,
            input_vocab_size: 10,
            output_vocab_size: 7,
            dropout: 0.1,
        };
        let model = positionwise_seq2seq(&config, Mode::Train).unwrap();
        assert_eq!((model.n_in(), model.n_out()), (1, 1));
        let mut rng = StdRng::seed_from_u64(0);
        let (w, out) = model.init(&[ShapeDtype::i32([2, 5])], &mut rng).unwrap();
        assert_eq!(out, vec![ShapeDtype::f32([2, 5, 7])]);

        // Eval-mode model accepts train-mode weights.
        let eval_model = positionwise_seq2seq(&config, Mode::Eval).unwrap();
        let ids = tensor::from_vec(&[2, 5], vec![1.0, 2.0, 3.0, 0.0, 0.0, 9.0, 8.0, 7.0, 6.0, 5.0]).unwrap();
        let log_probs = eval_model.apply(&[ids], &w).unwrap();
        assert_eq!(log_probs[0].shape(), &[2, 5, 7]);
    }

    #[test]
    fn test_seq2seq_rejects_bad_dropout() {
        let config = ModelConfig {
            dropout: 1.5,
            ..ModelConfig::default()
        };
        assert!(positionwise_seq2seq(&config, Mode::Train).is_err());
    }
}
