//! A layer bound to its initialized weights.

use crate::nn::module::{Context, Layer, LayerError, Result, Weights};
use crate::shapes::ShapeDtype;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug)]
struct Initialized {
    weights: Weights,
    input_signature: Vec<ShapeDtype>,
    output_signature: Vec<ShapeDtype>,
}

/// Owns a layer tree together with the weights created for it.
///
/// ```
/// use layerstack::nn::{relu, Dense, Network};
/// use layerstack::serial;
/// use layerstack::shapes::ShapeDtype;
/// use layerstack::tensor;
///
/// let mut net = Network::new(serial![Dense::new(8), relu()]);
/// net.init(&[ShapeDtype::f32([2, 3])], 0).unwrap();
/// let out = net.call(&[tensor::ones(&[2, 3])]).unwrap();
/// assert_eq!(out[0].shape(), &[2, 8]);
/// ```
#[derive(Debug)]
pub struct Network {
    layer: Box<dyn Layer>,
    state: Option<Initialized>,
}

impl Network {
    pub fn new(layer: impl Layer + 'static) -> Self {
        Self::from_boxed(Box::new(layer))
    }

    pub fn from_boxed(layer: Box<dyn Layer>) -> Self {
        Self { layer, state: None }
    }

    pub fn layer(&self) -> &dyn Layer {
        self.layer.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// Creates fresh weights for `input_signature`, seeded by `seed`.
    pub fn init(&mut self, input_signature: &[ShapeDtype], seed: u64) -> Result<&Weights> {
        let mut rng = StdRng::seed_from_u64(seed);
        let (weights, output_signature) = self.layer.init(input_signature, &mut rng)?;
        let state = self.state.insert(Initialized {
            weights,
            input_signature: input_signature.to_vec(),
            output_signature,
        });
        Ok(&state.weights)
    }

    fn state(&self) -> Result<&Initialized> {
        self.state
            .as_ref()
            .ok_or_else(|| LayerError::NotInitialized(self.layer.name().to_string()))
    }

    pub fn weights(&self) -> Result<&Weights> {
        Ok(&self.state()?.weights)
    }

    /// Replaces the weights; the new tree must match the current one.
    pub fn set_weights(&mut self, weights: Weights) -> Result<()> {
        let name = self.layer.name().to_string();
        let state = self
            .state
            .as_mut()
            .ok_or(LayerError::NotInitialized(name))?;
        if !state.weights.same_structure(&weights) {
            return Err(LayerError::WeightsStructure(
                "new weights do not match the initialized tree".to_string(),
            ));
        }
        state.weights = weights;
        Ok(())
    }

    pub fn input_signature(&self) -> Result<&[ShapeDtype]> {
        Ok(&self.state()?.input_signature)
    }

    pub fn output_signature(&self) -> Result<&[ShapeDtype]> {
        Ok(&self.state()?.output_signature)
    }

    /// Runs the network in eval mode.
    pub fn call(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.layer.apply(inputs, self.weights()?)
    }

    /// Runs the network under the given context, e.g. in train mode.
    pub fn call_with(&self, inputs: &[Tensor], ctx: &mut Context) -> Result<Vec<Tensor>> {
        Ok(self.layer.forward(inputs, self.weights()?, ctx)?.0)
    }
}
