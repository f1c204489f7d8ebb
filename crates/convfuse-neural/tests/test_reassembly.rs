use convfuse_core::{ops, Tensor};
use convfuse_neural::deployment::{
    reassemble, FusionConfig, FusionError, FusionPolicy, FusionVariant, LayerFusion,
};
use convfuse_neural::layers::{
    Activation, BNParams, BatchNorm, Concat, Conv2D, Layer, LayerType, Pool2D, Reorg,
};
use convfuse_neural::{LoadConfig, Sequential, SkyNet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn relaxed() -> LayerFusion {
    LayerFusion::with_config(FusionConfig::default().with_policy(FusionPolicy::FuseAvailable))
}

fn conv(in_channels: usize, out_channels: usize, groups: usize) -> Layer<f32> {
    Conv2D::zeros(in_channels, out_channels, (3, 3), (1, 1), (1, 1), groups, true)
        .unwrap()
        .into()
}

fn bn(features: usize) -> Layer<f32> {
    BatchNorm::identity(features).unwrap().into()
}

/// Random but well-conditioned SkyNet parameters
fn random_skynet(seed: u64) -> SkyNet<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    SkyNet::with_initializer(|name, shape| {
        let n: usize = shape.iter().product();
        let (low, high) = if name.ends_with("running_var") {
            (0.5, 1.5)
        } else if shape.len() == 1 && name.ends_with("weight") {
            (0.5, 1.5)
        } else if shape.len() == 4 {
            (-0.3, 0.3)
        } else {
            (-0.2, 0.2)
        };
        let data = (0..n).map(|_| rng.gen_range(low..high)).collect();
        Tensor::from_vec(data, shape).unwrap()
    })
    .unwrap()
}

fn random_input(seed: u64, shape: &[usize]) -> Tensor<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    Tensor::from_vec((0..n).map(|_| rng.gen_range(0.0..1.0)).collect(), shape).unwrap()
}

#[test]
fn test_output_length_and_order() {
    init_logging();
    let blocks = vec![
        conv(3, 3, 3),
        bn(3),
        Activation::ReLU6.into(),
        conv(3, 8, 1),
        bn(8),
        Activation::ReLU6.into(),
        Pool2D::max((2, 2), None).into(),
        Reorg::new(2).into(),
        Concat::channels().into(),
    ];
    let fused = reassemble(&blocks).unwrap();
    assert_eq!(fused.len(), blocks.len() - 2);

    let kinds: Vec<LayerType> = fused.iter().map(Layer::layer_type).collect();
    assert_eq!(
        kinds,
        vec![
            LayerType::Conv2D,
            LayerType::Activation,
            LayerType::Conv2D,
            LayerType::Activation,
            LayerType::Pool,
            LayerType::Reorg,
            LayerType::Concat,
        ]
    );
    assert_eq!(&fused[4..], &blocks[6..]);
    match &fused[0] {
        Layer::Convolution(conv) => assert_eq!(conv.params().groups(), 3),
        other => panic!("unexpected layer: {other:?}"),
    }
}

#[test]
fn test_stray_batch_norm() {
    init_logging();
    let blocks = vec![bn(3), conv(3, 3, 1), bn(3)];
    match reassemble(&blocks).unwrap_err() {
        FusionError::UnfusableLayer {
            layer_index,
            layer_type,
            ..
        } => {
            assert_eq!(layer_index, 0);
            assert_eq!(layer_type, LayerType::BatchNorm);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let (fused, stats) = relaxed().reassemble(&blocks).unwrap();
    assert_eq!(fused.len(), 2);
    assert_eq!(fused[0], blocks[0]);
    assert_eq!(stats.fusions_applied, 1);
    assert_eq!(stats.passed_through, 1);
}

#[test]
fn test_batch_norm_after_activation_is_not_fused() {
    let blocks = vec![conv(3, 3, 1), Activation::ReLU.into(), bn(3)];
    let err = reassemble(&blocks).unwrap_err();
    assert_eq!(err.layer_index(), Some(0));

    let (fused, stats) = relaxed().reassemble(&blocks).unwrap();
    assert_eq!(fused, blocks);
    assert_eq!(stats.fusions_applied, 0);
    assert_eq!(stats.passed_through, 2);
}

#[test]
fn test_degenerate_variance_names_batch_norm_layer() {
    let zero_var = BNParams::identity(3)
        .unwrap()
        .with_state(
            Tensor::ones(&[3]),
            Tensor::zeros(&[3]),
            Tensor::zeros(&[3]),
            Tensor::from_vec(vec![1.0, 0.0, 1.0], &[3]).unwrap(),
        )
        .unwrap()
        .with_eps(1e-5)
        .unwrap();
    let negative = zero_var
        .clone()
        .with_state(
            Tensor::ones(&[3]),
            Tensor::zeros(&[3]),
            Tensor::zeros(&[3]),
            Tensor::from_vec(vec![1.0, -1.0, 1.0], &[3]).unwrap(),
        )
        .unwrap();

    // zero variance is still positive once eps is added
    let blocks = vec![conv(3, 3, 1), BatchNorm::new(zero_var).into()];
    assert!(reassemble(&blocks).is_ok());

    let blocks = vec![
        conv(3, 3, 1),
        bn(3),
        Activation::ReLU.into(),
        conv(3, 3, 1),
        BatchNorm::new(negative).into(),
    ];
    match reassemble(&blocks).unwrap_err() {
        FusionError::DegenerateVariance {
            layer_index,
            channel,
            ..
        } => {
            assert_eq!(layer_index, Some(4));
            assert_eq!(channel, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_sequential_fusion_preserves_output() {
    init_logging();
    let mut rng = StdRng::seed_from_u64(11);
    let mut random = |shape: &[usize], low: f32, high: f32| {
        let n: usize = shape.iter().product();
        Tensor::from_vec((0..n).map(|_| rng.gen_range(low..high)).collect(), shape).unwrap()
    };

    let model = Sequential::default()
        .add(Conv2D::zeros(4, 4, (3, 3), (1, 1), (1, 1), 4, false).unwrap())
        .add(BatchNorm::identity(4).unwrap())
        .add(Activation::LeakyReLU {
            negative_slope: 0.1,
        })
        .add(Conv2D::zeros(4, 6, (1, 1), (1, 1), (0, 0), 2, true).unwrap())
        .add(BatchNorm::identity(6).unwrap())
        .add(Pool2D::average((2, 2), None));
    let mut dict = model.state_dict("net");
    let names: Vec<String> = dict.names().map(String::from).collect();
    for name in names {
        let shape = dict.get(&name).unwrap().shape().dims().to_vec();
        let tensor = if name.ends_with("running_var") {
            random(&shape, 0.2, 2.0)
        } else {
            random(&shape, -1.0, 1.0)
        };
        dict.insert(name, tensor);
    }
    let mut model = model;
    model.load_state_dict("net", &dict, &LoadConfig::new()).unwrap();

    let fusion = LayerFusion::with_config(FusionConfig::default().with_verify(true));
    let (fused, stats) = fusion.fuse_sequential(&model).unwrap();
    assert_eq!(fused.len(), 4);
    assert_eq!(stats.variant_counts[&FusionVariant::Depthwise], 1);
    assert_eq!(stats.variant_counts[&FusionVariant::Grouped], 1);
    assert!(stats.max_verification_error.unwrap() < 1e-4);

    let input = random_input(5, &[2, 4, 6, 6]);
    let expected = model.forward(&input).unwrap();
    let actual = fused.forward(&input).unwrap();
    assert!(ops::allclose(&actual, &expected, 1e-4, 1e-4).unwrap());
}

#[test]
fn test_verification_failure_is_reported() {
    let fusion = LayerFusion::with_config(
        FusionConfig::default()
            .with_verify(true)
            .with_tolerance(-1.0),
    );
    let blocks = vec![Activation::ReLU.into(), conv(2, 2, 1), bn(2)];
    match fusion.reassemble(&blocks).unwrap_err() {
        FusionError::VerificationFailed {
            layer_index,
            tolerance,
            ..
        } => {
            assert_eq!(layer_index, 1);
            assert_eq!(tolerance, -1.0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_skynet_requires_relaxed_policy() {
    init_logging();
    let net = SkyNet::<f32>::new().unwrap();
    match net.fuse(&LayerFusion::new()).unwrap_err() {
        FusionError::UnfusableLayer {
            layer_index,
            layer_type,
            ..
        } => {
            assert_eq!(layer_index, 6);
            assert_eq!(layer_type, LayerType::Conv2D);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_skynet_fusion_end_to_end() {
    init_logging();
    let net = random_skynet(42);
    let (fused, stats) = net.fuse(&relaxed()).unwrap();

    assert_eq!(stats.fusions_applied, 10);
    assert_eq!(stats.passed_through, 1);
    assert_eq!(stats.variant_counts[&FusionVariant::Depthwise], 5);
    assert_eq!(stats.variant_counts[&FusionVariant::Standard], 5);
    assert_eq!(fused.num_layers(), net.num_layers() - 10);
    assert!(fused
        .stages()
        .iter()
        .all(|s| s.layers().iter().all(|l| l.layer_type() != LayerType::BatchNorm)));

    let input = random_input(3, &[1, 3, 16, 32]);
    let expected = net.forward(&input).unwrap();
    let actual = fused.forward(&input).unwrap();
    assert_eq!(actual.shape().dims(), &[1, 10, 2, 4]);
    let deviation = ops::max_abs_diff(&actual, &expected).unwrap();
    assert!(
        ops::allclose(&actual, &expected, 1e-3, 1e-3).unwrap(),
        "max deviation {deviation}"
    );
}

#[test]
fn test_skynet_state_survives_fusion_round_trip() {
    let net = random_skynet(9);
    let (fused, _) = net.fuse(&relaxed()).unwrap();
    let dict = fused.state_dict();

    // every fused convolution carries a bias, the unfused head does not
    assert!(dict.contains("model_p1.0.bias"));
    assert!(dict.contains("model_p3.4.weight"));
    assert!(!dict.contains("model_p3.4.bias"));
    assert!(!dict.names().any(|n| n.ends_with("running_var")));

    let mut copy = fused.clone();
    copy.load_state_dict(&dict, &LoadConfig::new()).unwrap();
    assert_eq!(copy, fused);
}
