use briny_dispatch::api::Context;
use briny_dispatch::backend::Backend;
use briny_dispatch::config::{ContextConfig, Precision};
use briny_dispatch::error::{DispatchError, ErrorKind};
use briny_dispatch::ops::{dispatch, random};
use briny_dispatch::tensors::{DType, MemoryFormat, Tensor, TensorOptions};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn device_tensor(context: &Arc<Context>, shape: &[usize]) -> Tensor {
    Tensor::zeros(shape.to_vec()).to_device(context).unwrap()
}

fn assert_in(values: &[f32], lo: f32, hi: f32) {
    for &v in values {
        assert!(v >= lo && v < hi, "{v} outside [{lo}, {hi})");
    }
}

#[test]
fn test_uniform_full_precision_bounds() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[4, 4]);
    let upper = 1.0 - 1.1920928955078125e-07;

    random::uniform_(&mut t, 0.0, upper, None).unwrap();

    let values = t.to_vec().unwrap();
    assert_eq!(values.len(), 16);
    assert_in(&values, 0.0, 1.0);
    assert!(values.iter().all(|&v| f64::from(v) < upper));
}

#[test]
fn test_uniform_reduced_precision_bounds() {
    let context = Context::host(ContextConfig::default().with_precision(Precision::Reduced));
    let mut t = device_tensor(&context, &[32, 32]);
    let upper = 1.0 - f64::from(Precision::Reduced.epsilon());

    random::uniform_(&mut t, 0.0, upper, None).unwrap();

    let values = t.to_vec().unwrap();
    assert_in(&values, 0.0, 1.0);
    for v in values {
        assert_eq!(half::f16::from_f32(v).to_f32(), v);
    }
}

#[test]
fn test_uniform_arbitrary_interval_and_volume() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[3, 5, 70, 9]);
    random::uniform_(&mut t, -4.5, -2.0, None).unwrap();
    let values = t.to_vec().unwrap();
    assert_eq!(values.len(), 3 * 5 * 70 * 9);
    assert_in(&values, -4.5, -2.0);
    // not a constant fill
    assert!(values.iter().any(|&v| v != values[0]));
}

#[test]
fn test_uniform_span_wider_than_f32_max() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[4, 64]);
    random::uniform_(&mut t, -3.0e38, 3.0e38, None).unwrap();
    let values = t.to_vec().unwrap();
    assert!(values.iter().all(|v| v.is_finite()));
    assert_in(&values, -3.0e38, 3.0e38);
    let mut distinct = values.clone();
    distinct.sort_by(f32::total_cmp);
    distinct.dedup();
    assert!(distinct.len() > values.len() / 2, "{} distinct", distinct.len());
    assert!(values.iter().any(|&v| v < 0.0) && values.iter().any(|&v| v > 0.0));
}

#[test]
fn test_uniform_reduced_precision_never_below_from() {
    let context = Context::host(ContextConfig::default().with_precision(Precision::Reduced));
    let mut t = device_tensor(&context, &[16, 16]);
    // 0.1 rounds down in binary16
    random::uniform_(&mut t, 0.1, 0.2, None).unwrap();
    assert_in(&t.to_vec().unwrap(), 0.1, 0.2);
}

#[test]
fn test_uniform_long_vector() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[100_000]);
    random::uniform_(&mut t, 0.0, 1.0, None).unwrap();
    let values = t.to_vec().unwrap();
    assert_in(&values, 0.0, 1.0);
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64;
    assert!((mean - 0.5).abs() < 0.01, "mean {mean}");
}

#[test]
fn test_uniform_returns_the_same_tensor() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[2, 2]);
    let id = t.device_view().unwrap().storage().id();
    let returned = random::uniform_(&mut t, 0.0, 1.0, None).unwrap();
    assert_eq!(returned.device_view().unwrap().storage().id(), id);
}

#[test]
fn test_consecutive_fills_differ() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[8, 8]);
    random::uniform_(&mut t, 0.0, 1.0, None).unwrap();
    let first = t.to_vec().unwrap();
    random::uniform_(&mut t, 0.0, 1.0, Some(&random::Generator { seed: 7 })).unwrap();
    assert_ne!(first, t.to_vec().unwrap());
}

#[test]
fn test_uniform_on_host_tensor_is_rejected() {
    let mut t = Tensor::new(vec![2], vec![1.0, 2.0]);
    let err = random::uniform_(&mut t, 0.0, 1.0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
    assert!(err.to_string().contains("only supported on GPU-resident tensors"));
    assert_eq!(t.to_vec().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_rand_like_shape_and_independence() {
    let context = Context::host(ContextConfig::default());
    let data: Vec<f32> = (0..24).map(|i| i as f32 * 10.0).collect();
    let mut reference = Tensor::new(vec![2, 3, 4], data.clone()).to_device(&context).unwrap();

    let mut a = random::rand_like(&reference, TensorOptions::default()).unwrap();
    let mut b = random::rand_like(&reference, TensorOptions::default()).unwrap();

    assert_eq!(a.shape(), reference.shape());
    assert!(a.is_device_resident());
    assert_ne!(
        a.device_view().unwrap().storage().id(),
        reference.device_view().unwrap().storage().id()
    );
    let (va, vb) = (a.to_vec().unwrap(), b.to_vec().unwrap());
    assert_in(&va, 0.0, 1.0);
    assert_in(&vb, 0.0, 1.0);
    assert_ne!(va, vb);
    assert_eq!(reference.to_vec().unwrap(), data);
}

fn check_rand_like_results(precision: Precision) {
    let context = Context::host(ContextConfig::default().with_precision(precision));
    let reference = device_tensor(&context, &[6, 7]);
    let upper = 1.0 - precision.epsilon();

    let mut a = random::rand_like(&reference, TensorOptions::default()).unwrap();
    let mut b = random::rand_like(&reference, TensorOptions::default()).unwrap();
    assert_ne!(
        a.device_view().unwrap().storage().id(),
        b.device_view().unwrap().storage().id()
    );

    let before = b.to_vec().unwrap();
    for values in [a.to_vec().unwrap(), before.clone()] {
        assert!(
            values.iter().all(|&v| (0.0..upper).contains(&v)),
            "{precision:?}: sample outside [0, {upper})"
        );
    }

    a.device_view_mut().unwrap().write(&[5.0; 42]).unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![5.0; 42]);
    assert_eq!(b.to_vec().unwrap(), before);
}

#[test]
fn test_rand_like_full_precision_results() {
    check_rand_like_results(Precision::Full);
}

#[test]
fn test_rand_like_reduced_precision_results() {
    check_rand_like_results(Precision::Reduced);
}

#[test]
fn test_rand_like_ignores_overrides() {
    let context = Context::host(ContextConfig::default().with_precision(Precision::Reduced));
    let reference = device_tensor(&context, &[5, 5]);
    let options = TensorOptions::new()
        .with_dtype(DType::F16)
        .with_device(Backend::Cpu)
        .with_memory_format(MemoryFormat::ChannelsLast);

    let mut r = random::rand_like(&reference, options).unwrap();

    assert_eq!(r.shape(), &[5, 5]);
    assert_eq!(r.backend(), Backend::Emulated);
    assert_in(&r.to_vec().unwrap(), 0.0, 1.0);
}

#[test]
fn test_rand_like_on_host_tensor_is_rejected() {
    let reference = Tensor::zeros(vec![3]);
    let err = random::rand_like(&reference, TensorOptions::default()).unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionViolation { .. }));
}

#[test]
fn test_rand_like_zero_size() {
    let context = Context::host(ContextConfig::default());
    let reference = device_tensor(&context, &[0, 4]);
    let mut r = random::rand_like(&reference, TensorOptions::default()).unwrap();
    assert_eq!(r.shape(), &[0, 4]);
    assert_eq!(r.to_vec().unwrap(), Vec::<f32>::new());
    assert_eq!(context.stats().dispatches, 0);
}

#[test]
fn test_same_seed_same_samples() {
    let sample = || {
        let context = Context::host(ContextConfig::default().with_seed(42));
        let reference = device_tensor(&context, &[16]);
        random::rand_like(&reference, TensorOptions::default())
            .unwrap()
            .to_vec()
            .unwrap()
    };
    assert_eq!(sample(), sample());
}

#[test]
fn test_registry_entry_points() {
    let context = Context::host(ContextConfig::default());
    let mut t = device_tensor(&context, &[4, 4]);

    dispatch::uniform_(&mut t, 10.0, 11.0, None).unwrap();
    assert_in(&t.to_vec().unwrap(), 10.0, 11.0);

    let mut r = dispatch::rand_like(&t, TensorOptions::default()).unwrap();
    assert_in(&r.to_vec().unwrap(), 0.0, 1.0);

    let err = dispatch::rand_like(&Tensor::zeros(vec![1]), TensorOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionViolation);

    let mut host = Tensor::new(vec![2], vec![1.0, 2.0]);
    let err = dispatch::uniform_(&mut host, 0.0, 1.0, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
    assert_eq!(host.to_vec().unwrap(), vec![1.0, 2.0]);
}
