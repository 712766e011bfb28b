//! Combinators: layers built from other layers.
//!
//! Sublayers exchange values through a data stack, a `Vec<Tensor>` whose
//! index 0 is the top. A sublayer with `n_in = k` pops the top `k` items and
//! pushes its `n_out` outputs in their place; items further down pass through
//! untouched. Backward passes run the same protocol over a stack of
//! gradients, visiting sublayers in reverse.

use crate::nn::function::add;
use crate::nn::module::{
    check_grads, check_inputs, shape_error, Cache, Context, Layer, LayerError, Result, Weights,
};
use crate::shapes::ShapeDtype;
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// Builds a [`Serial`] from layer expressions, boxing each one.
///
/// ```
/// use layerstack::nn::{relu, Dense, LayerNorm};
/// use layerstack::serial;
///
/// let mlp = serial![Dense::new(16), relu(), LayerNorm::new(), Dense::new(4)];
/// ```
#[macro_export]
macro_rules! serial {
    ($($layer:expr),* $(,)?) => {
        $crate::nn::Serial::new(vec![
            $(Box::new($layer) as Box<dyn $crate::nn::Layer>),*
        ])
    };
}

fn underflow(layer: &dyn Layer, needed: usize, available: usize) -> LayerError {
    LayerError::StackUnderflow {
        layer: layer.name().to_string(),
        needed,
        available,
    }
}

/// Pops `n` items off the top of `stack`, leaving the rest in `stack`.
fn pop_top<T>(stack: &mut Vec<T>, n: usize) -> Vec<T> {
    let rest = stack.split_off(n);
    std::mem::replace(stack, rest)
}

/// Pushes `items` on top of `stack`.
fn push_top<T>(stack: &mut Vec<T>, mut items: Vec<T>) {
    items.append(stack);
    *stack = items;
}

/// Counts the inputs and outputs of layers run in sequence over the data stack.
fn serial_arity(layers: &[Box<dyn Layer>]) -> (usize, usize) {
    let mut running_max = 0usize;
    let mut running_total = 0isize;
    for layer in layers {
        running_total += layer.n_in() as isize;
        running_max = running_max.max(running_total.max(0) as usize);
        running_total -= layer.n_out() as isize;
    }
    let n_out = (running_max as isize - running_total).max(0) as usize;
    (running_max, n_out)
}

/// Runs sublayers one after another over the data stack.
#[derive(Debug)]
pub struct Serial {
    layers: Vec<Box<dyn Layer>>,
    n_in: usize,
    n_out: usize,
}

impl Serial {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        let (n_in, n_out) = serial_arity(&layers);
        Self {
            layers,
            n_in,
            n_out,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Layer for Serial {
    fn name(&self) -> &str {
        "Serial"
    }

    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_out(&self) -> usize {
        self.n_out
    }

    fn sublayers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        let mut stack = input_signature.to_vec();
        let mut children = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            if stack.len() < layer.n_in() {
                return Err(underflow(layer.as_ref(), layer.n_in(), stack.len()));
            }
            let args = pop_top(&mut stack, layer.n_in());
            let (weights, outputs) = layer.init(&args, rng)?;
            children.push(weights);
            push_top(&mut stack, outputs);
        }
        Ok((Weights::node(children), stack))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let mut stack = inputs.to_vec();
        let mut caches = Vec::with_capacity(self.layers.len());
        for (i, layer) in self.layers.iter().enumerate() {
            if stack.len() < layer.n_in() {
                return Err(underflow(layer.as_ref(), layer.n_in(), stack.len()));
            }
            let args = pop_top(&mut stack, layer.n_in());
            let (outputs, cache) = layer.forward(&args, weights.child(i)?, ctx)?;
            caches.push(cache);
            push_top(&mut stack, outputs);
        }
        Ok((stack, Cache::with_children(caches)))
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let mut stack = grads.to_vec();
        let mut weight_grads = vec![Weights::empty(); self.layers.len()];
        for (i, layer) in self.layers.iter().enumerate().rev() {
            if stack.len() < layer.n_out() {
                return Err(underflow(layer.as_ref(), layer.n_out(), stack.len()));
            }
            let output_grads = pop_top(&mut stack, layer.n_out());
            let (input_grads, w_grads) =
                layer.backward(cache.child(i)?, weights.child(i)?, &output_grads)?;
            weight_grads[i] = w_grads;
            push_top(&mut stack, input_grads);
        }
        Ok((stack, Weights::node(weight_grads)))
    }
}

/// Runs sublayers side by side, each on its own slice of the inputs.
#[derive(Debug)]
pub struct Parallel {
    layers: Vec<Box<dyn Layer>>,
}

impl Parallel {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }
}

impl Layer for Parallel {
    fn name(&self) -> &str {
        "Parallel"
    }

    fn n_in(&self) -> usize {
        self.layers.iter().map(|l| l.n_in()).sum()
    }

    fn n_out(&self) -> usize {
        self.layers.iter().map(|l| l.n_out()).sum()
    }

    fn sublayers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        let mut offset = 0;
        let mut children = Vec::with_capacity(self.layers.len());
        let mut outputs = Vec::new();
        for layer in &self.layers {
            let args = &input_signature[offset..offset + layer.n_in()];
            offset += layer.n_in();
            let (weights, outs) = layer.init(args, rng)?;
            children.push(weights);
            outputs.extend(outs);
        }
        Ok((Weights::node(children), outputs))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let mut offset = 0;
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut outputs = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let args = &inputs[offset..offset + layer.n_in()];
            offset += layer.n_in();
            let (outs, cache) = layer.forward(args, weights.child(i)?, ctx)?;
            caches.push(cache);
            outputs.extend(outs);
        }
        Ok((outputs, Cache::with_children(caches)))
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let mut offset = 0;
        let mut weight_grads = Vec::with_capacity(self.layers.len());
        let mut input_grads = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            let layer_grads = &grads[offset..offset + layer.n_out()];
            offset += layer.n_out();
            let (g_in, g_w) = layer.backward(cache.child(i)?, weights.child(i)?, layer_grads)?;
            weight_grads.push(g_w);
            input_grads.extend(g_in);
        }
        Ok((input_grads, Weights::node(weight_grads)))
    }
}

/// Copies, reorders or drops items at the top of the data stack.
///
/// Output `k` is input `indices[k]`. When an input is copied several times its
/// gradient is the sum of the copies' gradients; dropped inputs get zeros.
#[derive(Debug, Clone)]
pub struct Select {
    indices: Vec<usize>,
    n_in: usize,
    name: String,
}

impl Select {
    pub fn new(indices: Vec<usize>, n_in: usize) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= n_in) {
            return Err(LayerError::InvalidArgument(format!(
                "select index {} is out of range for {} input(s)",
                bad, n_in
            )));
        }
        Ok(Self::unchecked(indices, n_in))
    }

    fn unchecked(indices: Vec<usize>, n_in: usize) -> Self {
        let name = format!("Select{:?}_in{}", indices, n_in);
        Self {
            indices,
            n_in,
            name,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

/// Duplicates the top stack item.
pub fn dup() -> Select {
    Select::unchecked(vec![0, 0], 1)
}

/// Swaps the top two stack items.
pub fn swap() -> Select {
    Select::unchecked(vec![1, 0], 2)
}

/// Discards the top stack item.
pub fn drop_top() -> Select {
    Select::unchecked(vec![], 1)
}

/// Passes the top stack item through unchanged.
pub fn identity() -> Select {
    Select::unchecked(vec![0], 1)
}

impl Layer for Select {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_out(&self) -> usize {
        self.indices.len()
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        let outputs = self
            .indices
            .iter()
            .map(|&i| input_signature[i].clone())
            .collect();
        Ok((Weights::empty(), outputs))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        _weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let outputs = self.indices.iter().map(|&i| inputs[i].clone()).collect();
        let shapes = inputs.iter().map(|t| t.shape().to_vec()).collect();
        Ok((outputs, Cache::with_shapes(shapes)))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let mut input_grads: Vec<Tensor> = cache
            .shapes
            .iter()
            .map(|shape| crate::tensor::zeros(shape))
            .collect();
        if input_grads.len() != self.n_in {
            return Err(LayerError::InvalidArgument(format!(
                "backward cache for '{}' holds {} shapes",
                self.name,
                input_grads.len()
            )));
        }
        for (g, &i) in grads.iter().zip(&self.indices) {
            if g.shape() != input_grads[i].shape() {
                return Err(shape_error(
                    self,
                    format!(
                        "gradient shape {:?} does not match input {} shape {:?}",
                        g.shape(),
                        i,
                        input_grads[i].shape()
                    ),
                ));
            }
            input_grads[i] += g;
        }
        Ok((input_grads, Weights::empty()))
    }
}

/// Runs each sublayer on copies of the top stack items.
///
/// `n_in` is the largest sublayer `n_in`; the outputs of all branches are
/// pushed in order. Equivalent to `Serial(Select(..), Parallel(layers))`.
#[derive(Debug)]
pub struct Branch {
    inner: Serial,
}

impl Branch {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        let n_in = layers.iter().map(|l| l.n_in()).max().unwrap_or(0);
        let indices: Vec<usize> = layers.iter().flat_map(|l| 0..l.n_in()).collect();
        let inner = Serial::new(vec![
            Box::new(Select::unchecked(indices, n_in)),
            Box::new(Parallel::new(layers)),
        ]);
        Self { inner }
    }
}

impl Layer for Branch {
    fn name(&self) -> &str {
        "Branch"
    }

    fn n_in(&self) -> usize {
        self.inner.n_in()
    }

    fn n_out(&self) -> usize {
        self.inner.n_out()
    }

    /// The branches themselves, not the internal select/parallel pair.
    fn sublayers(&self) -> &[Box<dyn Layer>] {
        self.inner
            .layers
            .get(1)
            .map(|parallel| parallel.sublayers())
            .unwrap_or(&[])
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        self.inner.init(input_signature, rng)
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        self.inner.forward(inputs, weights, ctx)
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        self.inner.backward(cache, weights, grads)
    }
}

/// Adds a shortcut around `layers`: `Serial(Branch(Serial(layers), identity), Add)`.
#[derive(Debug)]
pub struct Residual {
    inner: Serial,
}

impl Residual {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        let branch = Branch::new(vec![Box::new(Serial::new(layers)), Box::new(identity())]);
        let inner = Serial::new(vec![Box::new(branch), Box::new(add())]);
        Self { inner }
    }
}

impl Layer for Residual {
    fn name(&self) -> &str {
        "Residual"
    }

    fn n_in(&self) -> usize {
        self.inner.n_in()
    }

    fn n_out(&self) -> usize {
        self.inner.n_out()
    }

    fn sublayers(&self) -> &[Box<dyn Layer>] {
        self.inner.sublayers()
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        self.inner.init(input_signature, rng)
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        self.inner.forward(inputs, weights, ctx)
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        self.inner.backward(cache, weights, grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::activations::relu;
    use crate::nn::function::concatenate;
    use crate::tensor;

    fn t(data: Vec<f32>) -> Tensor {
        let n = data.len();
        tensor::from_vec(&[n], data).unwrap()
    }

    #[test]
    fn test_serial_arity() {
        let s = serial![relu(), add()];
        assert_eq!((s.n_in(), s.n_out()), (2, 1));

        let s = serial![dup(), dup(), add(), add()];
        assert_eq!((s.n_in(), s.n_out()), (1, 1));

        let s = serial![swap(), drop_top()];
        assert_eq!((s.n_in(), s.n_out()), (2, 1));

        let empty = Serial::new(vec![]);
        assert_eq!((empty.n_in(), empty.n_out()), (0, 0));
    }

    #[test]
    fn test_serial_passes_untouched_items_through() {
        // Relu only touches the top item; the second rides along.
        let s = serial![relu()];
        let layer = Serial::new(vec![Box::new(s), Box::new(swap())]);
        assert_eq!(layer.n_in(), 2);
        let w = Weights::node(vec![Weights::node(vec![Weights::empty()]), Weights::empty()]);
        let out = layer.apply(&[t(vec![-1.0, 2.0]), t(vec![-3.0])], &w).unwrap();
        assert_eq!(out, vec![t(vec![-3.0]), t(vec![0.0, 2.0])]);
    }

    #[test]
    fn test_select_copies_and_reorders() {
        let sel = Select::new(vec![2, 0, 0], 3).unwrap();
        let out = sel
            .apply(&[t(vec![1.0]), t(vec![2.0]), t(vec![3.0])], &Weights::empty())
            .unwrap();
        assert_eq!(out, vec![t(vec![3.0]), t(vec![1.0]), t(vec![1.0])]);
        assert!(Select::new(vec![3], 3).is_err());
    }

    #[test]
    fn test_select_backward_sums_copies() {
        let layer = dup();
        let mut ctx = Context::eval();
        let (_, cache) = layer
            .forward(&[t(vec![5.0, 6.0])], &Weights::empty(), &mut ctx)
            .unwrap();
        let (grads, _) = layer
            .backward(&cache, &Weights::empty(), &[t(vec![1.0, 2.0]), t(vec![10.0, 20.0])])
            .unwrap();
        assert_eq!(grads, vec![t(vec![11.0, 22.0])]);

        let (_, cache) = drop_top()
            .forward(&[t(vec![5.0, 6.0])], &Weights::empty(), &mut ctx)
            .unwrap();
        let (grads, _) = drop_top().backward(&cache, &Weights::empty(), &[]).unwrap();
        assert_eq!(grads, vec![t(vec![0.0, 0.0])]);
    }

    #[test]
    fn test_branch_feeds_copies() {
        let branch = Branch::new(vec![Box::new(relu()), Box::new(identity())]);
        assert_eq!((branch.n_in(), branch.n_out()), (1, 2));
        assert_eq!(branch.sublayers().len(), 2);
        let mut rng = rand::SeedableRng::seed_from_u64(0);
        let (w, sig) = branch.init(&[ShapeDtype::f32([2])], &mut rng).unwrap();
        assert_eq!(sig.len(), 2);
        let out = branch.apply(&[t(vec![-1.0, 1.0])], &w).unwrap();
        assert_eq!(out, vec![t(vec![0.0, 1.0]), t(vec![-1.0, 1.0])]);
    }

    #[test]
    fn test_branch_then_concatenate() {
        let layer = serial![
            Branch::new(vec![Box::new(relu()), Box::new(identity())]),
            concatenate(2, -1)
        ];
        let mut rng = rand::SeedableRng::seed_from_u64(0);
        let (w, sig) = layer.init(&[ShapeDtype::f32([3, 2])], &mut rng).unwrap();
        assert_eq!(sig, vec![ShapeDtype::f32([3, 4])]);
        let x = tensor::from_vec(&[3, 2], vec![-1.0, 1.0, 2.0, -2.0, 0.5, 0.5]).unwrap();
        let out = layer.apply(&[x], &w).unwrap();
        assert_eq!(out[0].shape(), &[3, 4]);
        assert_eq!(out[0][[1, 1]], 0.0);
        assert_eq!(out[0][[1, 3]], -2.0);
    }

    #[test]
    fn test_parallel_slices_inputs() {
        let par = Parallel::new(vec![Box::new(relu()), Box::new(add())]);
        assert_eq!((par.n_in(), par.n_out()), (3, 2));
        let w = Weights::node(vec![Weights::empty(), Weights::empty()]);
        let out = par
            .apply(&[t(vec![-1.0]), t(vec![2.0]), t(vec![3.0])], &w)
            .unwrap();
        assert_eq!(out, vec![t(vec![0.0]), t(vec![5.0])]);
    }

    #[test]
    fn test_residual_backward_adds_shortcut() {
        let layer = Residual::new(vec![Box::new(relu())]);
        let mut rng = rand::SeedableRng::seed_from_u64(0);
        let (w, _) = layer.init(&[ShapeDtype::f32([2])], &mut rng).unwrap();
        let mut ctx = Context::eval();
        let (out, cache) = layer.forward(&[t(vec![-1.0, 3.0])], &w, &mut ctx).unwrap();
        assert_eq!(out, vec![t(vec![-1.0, 6.0])]);
        let (grads, _) = layer.backward(&cache, &w, &[t(vec![1.0, 1.0])]).unwrap();
        assert_eq!(grads, vec![t(vec![1.0, 2.0])]);
    }

    #[test]
    fn test_wrong_input_count_on_serial() {
        let layer = serial![add()];
        let err = layer.apply(&[t(vec![1.0])], &Weights::node(vec![Weights::empty()]));
        assert!(matches!(err, Err(LayerError::InputCount { expected: 2, actual: 1, .. })));
    }

    #[test]
    fn test_missing_child_weights() {
        let layer = serial![relu(), relu()];
        let err = layer.apply(&[t(vec![1.0])], &Weights::node(vec![Weights::empty()]));
        assert!(matches!(err, Err(LayerError::WeightsStructure(_))));
    }
}
