//! Data-stack semantics of combinators, exercised through the public API.

use layerstack::nn::{
    add, concatenate, drop_top, dup, identity, relu, swap, Branch, Context, Dense, Layer,
    LayerError, LayerNorm, Network, Parallel, Residual, Select, Serial,
};
use layerstack::serial;
use layerstack::shapes::{signature, splice_signatures, DType, ShapeDtype, Signature};
use layerstack::tensor::{self, Tensor};

fn row(values: &[f32]) -> Tensor {
    tensor::from_vec(&[1, values.len()], values.to_vec()).unwrap()
}

fn init(layer: impl Layer + 'static, signature: &[ShapeDtype]) -> Network {
    let mut net = Network::new(layer);
    net.init(signature, 0).unwrap();
    net
}

#[test]
fn test_relu_then_layer_norm() {
    let block = serial![relu(), LayerNorm::new()];
    assert_eq!((block.n_in(), block.n_out()), (1, 1));

    let net = init(block, &[ShapeDtype::f32([1, 4])]);
    let y = net.call(&[row(&[-2.0, 0.0, 1.0, 3.0])]).unwrap();
    // relu gives [0, 0, 1, 3]; normalized to zero mean.
    assert!(y[0].sum().abs() < 1e-5);
    assert_eq!(y[0][[0, 0]], y[0][[0, 1]]);
}

#[test]
fn test_concatenate_three_items() {
    let concat = concatenate(3, -1);
    assert_eq!((concat.n_in(), concat.n_out()), (3, 1));
    let y = concat
        .apply(&[row(&[1.0]), row(&[2.0, 3.0]), row(&[4.0])], &Default::default())
        .unwrap();
    assert_eq!(y[0], row(&[1.0, 2.0, 3.0, 4.0]));
}

#[test]
fn test_serial_arity_running_max() {
    // add needs two items, so the first dense sees the top and the second
    // item waits below it.
    let layer = serial![Dense::new(2), add()];
    assert_eq!((layer.n_in(), layer.n_out()), (2, 1));

    // dup pushes an extra item, which the serial leaves on the stack.
    let layer = serial![dup(), relu()];
    assert_eq!((layer.n_in(), layer.n_out()), (1, 2));

    let layer = serial![drop_top(), drop_top()];
    assert_eq!((layer.n_in(), layer.n_out()), (2, 0));

    let empty = Serial::new(Vec::new());
    assert_eq!((empty.n_in(), empty.n_out()), (0, 0));
}

#[test]
fn test_unconsumed_items_pass_through() {
    let layer = Serial::new(vec![
        Box::new(relu()) as Box<dyn Layer>,
        Box::new(Select::new(vec![0, 1], 2).unwrap()),
    ]);
    assert_eq!((layer.n_in(), layer.n_out()), (2, 2));

    let sig = [ShapeDtype::f32([1, 2]), ShapeDtype::f32([1, 1])];
    let net = init(layer, &sig);
    let out = net.call(&[row(&[-1.0, 2.0]), row(&[-3.0])]).unwrap();
    assert_eq!(out, vec![row(&[0.0, 2.0]), row(&[-3.0])]);
}

#[test]
fn test_swap_and_select() {
    let (a, b, c) = (row(&[1.0]), row(&[2.0]), row(&[3.0]));
    let empty = Default::default();

    let y = swap().apply(&[a.clone(), b.clone()], &empty).unwrap();
    assert_eq!(y, vec![b.clone(), a.clone()]);

    let select = Select::new(vec![2, 0, 0], 3).unwrap();
    let y = select.apply(&[a.clone(), b, c.clone()], &empty).unwrap();
    assert_eq!(y, vec![c, a.clone(), a.clone()]);

    assert_eq!(identity().apply(&[a.clone()], &empty).unwrap(), vec![a]);
    assert!(matches!(
        Select::new(vec![3], 2),
        Err(LayerError::InvalidArgument(_))
    ));
}

#[test]
fn test_branch_outputs_in_order() {
    let branch = Branch::new(vec![Box::new(relu()) as Box<dyn Layer>, Box::new(identity())]);
    assert_eq!((branch.n_in(), branch.n_out()), (1, 2));
    assert_eq!(branch.sublayers().len(), 2);

    let x = row(&[-1.0, 1.0]);
    let y = branch.apply(&[x.clone()], &init_weights(&branch, &[1, 2])).unwrap();
    assert_eq!(y, vec![row(&[0.0, 1.0]), x]);
}

fn init_weights(layer: &dyn Layer, shape: &[usize]) -> layerstack::nn::Weights {
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(0);
    layer.init(&[ShapeDtype::f32(shape)], &mut rng).unwrap().0
}

#[test]
fn test_branch_then_concatenate_doubles_width() {
    let model = serial![
        Branch::new(vec![Box::new(Dense::new(3)) as Box<dyn Layer>, Box::new(relu())]),
        concatenate(2, -1),
    ];
    let net = init(model, &[ShapeDtype::f32([5, 4])]);
    assert_eq!(net.output_signature().unwrap(), &[ShapeDtype::f32([5, 7])]);
}

#[test]
fn test_parallel_keeps_items_separate() {
    let parallel = Parallel::new(vec![Box::new(relu()) as Box<dyn Layer>, Box::new(dup())]);
    assert_eq!((parallel.n_in(), parallel.n_out()), (2, 3));
    let y = parallel
        .apply(&[row(&[-1.0]), row(&[5.0])], &init_parallel(&parallel))
        .unwrap();
    assert_eq!(y, vec![row(&[0.0]), row(&[5.0]), row(&[5.0])]);
}

fn init_parallel(layer: &Parallel) -> layerstack::nn::Weights {
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(0);
    let sig = [ShapeDtype::f32([1, 1]), ShapeDtype::f32([1, 1])];
    layer.init(&sig, &mut rng).unwrap().0
}

#[test]
fn test_residual_adds_input() {
    let residual = Residual::new(vec![Box::new(relu()) as Box<dyn Layer>]);
    let x = row(&[-1.0, 2.0]);
    let y = residual.apply(&[x], &init_weights(&residual, &[1, 2])).unwrap();
    assert_eq!(y, vec![row(&[-1.0, 4.0])]);
}

#[test]
fn test_arity_errors() {
    let layer = serial![Dense::new(2), add()];
    let net = Network::new(layer);
    let err = net.call(&[row(&[1.0])]).unwrap_err();
    assert!(matches!(err, LayerError::NotInitialized(_)));

    let mut net = Network::new(serial![add()]);
    let err = net.init(&[ShapeDtype::f32([1, 1])], 0).unwrap_err();
    assert!(matches!(err, LayerError::InputCount { .. }));
}

#[test]
fn test_grad_count_errors() {
    let layer = serial![dup(), relu()];
    let x = row(&[1.0, -1.0]);
    let (_, cache) = layer
        .forward(&[x.clone()], &init_weights(&layer, &[1, 2]), &mut Context::eval())
        .unwrap();
    let err = layer
        .backward(&cache, &init_weights(&layer, &[1, 2]), &[x])
        .unwrap_err();
    assert_eq!(
        err,
        LayerError::GradCount {
            layer: "Serial".to_string(),
            expected: 2,
            actual: 1
        }
    );
}

#[test]
fn test_signatures_of_stack_items() {
    let items = vec![tensor::zeros(&[2, 3]), tensor::zeros(&[4])];
    let sig = signature(&items);
    assert_eq!(sig.len(), 2);
    assert_eq!(sig.items()[1], ShapeDtype::f32([4]));

    let spliced = splice_signatures(&[
        Signature::from(ShapeDtype::f32([1])),
        Signature::from(vec![ShapeDtype::i32([2]), ShapeDtype::f32([3])]),
        Signature::Tuple(Vec::new()),
    ]);
    assert_eq!(spliced.len(), 3);
    assert_eq!(spliced.items()[1].dtype, DType::I32);
}
