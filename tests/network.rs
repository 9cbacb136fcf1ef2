use std::sync::Arc;

use layer_acc::approx::{ApproxEquality, approx_eq, approx_within};
use layer_acc::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn prelu_weights(layer: &str, slopes: &[f32]) -> NetResource {
    let mut weights = NetResource::default();
    weights.insert(
        layer,
        LayerResource::PRelu(PReluLayerResource {
            slope: RawBuffer::from_slice(slopes),
        }),
    );
    weights
}

fn prelu_relu_net(dims: Dims4, shared: bool) -> NetStructure {
    NetStructure {
        inputs: vec![("data".into(), dims)],
        layers: vec![
            LayerInfo::unary("prelu1", LayerType::PRelu, "data", "act")
                .with_param(LayerParam::PRelu(PReluLayerParam { channel_shared: shared })),
            LayerInfo::unary("relu1", LayerType::Relu, "act", "out"),
        ],
    }
}

fn cpu() -> NetworkConfig {
    NetworkConfig {
        backend: Backend::Cpu,
        fallback: None,
        precision: Precision::Auto,
    }
}

#[test]
fn test_create_returns_the_requested_family() {
    let registry = default_registry().unwrap();
    for layer in LayerType::ALL {
        let acc = registry.create(Backend::Cpu, layer).unwrap();
        assert_eq!(acc.layer_type(), layer);
        assert_eq!(acc.backend(), Backend::Cpu);
    }
    let err = registry.create(Backend::Cuda, LayerType::PRelu).err();
    assert_eq!(
        err,
        Some(AccError::UnsupportedDevice {
            backend: Backend::Cuda,
            layer: LayerType::PRelu
        })
    );
}

#[test]
fn test_custom_registry_is_explicit() {
    let mut builder = RegistryBuilder::new();
    layer_acc::ops::cpu::register_cpu_kernels(&mut builder).unwrap();
    assert!(matches!(
        layer_acc::ops::cpu::register_cpu_kernels(&mut builder),
        Err(AccError::DuplicateKernel { .. })
    ));
    let registry = builder.build();
    assert_eq!(registry.len(), LayerType::ALL.len());
    assert!(!registry.supports(Backend::Wgpu, LayerType::Scale));
}

#[test]
fn test_network_runs_layers_in_order() {
    let dims = Dims4::new(1, 2, 1, 3);
    let mut net = Network::new(
        cpu(),
        default_registry().unwrap(),
        prelu_relu_net(dims, false),
        &prelu_weights("prelu1", &[-1.0, 0.5]),
    )
    .unwrap();

    // slope -1 turns negatives positive, the ReLU then keeps them
    net.set_input("data", &[-1.0, 2.0, -3.0, -4.0, 5.0, -6.0]).unwrap();
    net.forward().unwrap();
    assert_eq!(net.output_nchw("act").unwrap(), [1.0, 2.0, 3.0, -2.0, 5.0, -3.0]);
    assert_eq!(net.output_nchw("out").unwrap(), [1.0, 2.0, 3.0, 0.0, 5.0, 0.0]);
}

#[test]
fn test_in_place_layers_read_the_previous_value() {
    let dims = Dims4::new(1, 3, 1, 2);
    let structure = NetStructure {
        inputs: vec![("data".into(), dims)],
        layers: vec![
            LayerInfo::unary("prelu1", LayerType::PRelu, "data", "data")
                .with_param(LayerParam::PRelu(PReluLayerParam { channel_shared: true })),
            LayerInfo::unary("relu1", LayerType::Relu, "data", "data"),
        ],
    };
    let mut net = Network::new(
        cpu(),
        default_registry().unwrap(),
        structure,
        &prelu_weights("prelu1", &[-2.0]),
    )
    .unwrap();

    net.set_input("data", &[-1.0, 2.0, -3.0, 4.0, 0.5, -0.5]).unwrap();
    net.forward().unwrap();
    assert_eq!(net.output_nchw("data").unwrap(), [2.0, 2.0, 6.0, 4.0, 0.5, 1.0]);
}

#[test]
fn test_oversized_input_fails_compilation() {
    let structure = NetStructure {
        inputs: vec![("data".into(), Dims4::new(usize::MAX / 2, 5, 3, 3))],
        layers: vec![LayerInfo::unary("relu1", LayerType::Relu, "data", "out")],
    };
    let err = Network::new(cpu(), default_registry().unwrap(), structure, &NetResource::default())
        .err();
    assert!(matches!(err, Some(AccError::InvalidResource(_))));
}

#[test]
fn test_missing_kernel_without_fallback_fails_compilation() {
    let config = NetworkConfig {
        backend: Backend::Cuda,
        ..cpu()
    };
    let err = Network::new(
        config,
        default_registry().unwrap(),
        prelu_relu_net(Dims4::new(1, 1, 1, 1), true),
        &prelu_weights("prelu1", &[0.1]),
    )
    .err();
    assert!(matches!(err, Some(AccError::UnsupportedDevice { .. })));
}

#[test]
fn test_fallback_device_is_used() {
    let config = NetworkConfig {
        backend: Backend::Cuda,
        fallback: Some(Backend::Cpu),
        precision: Precision::Auto,
    };
    let mut net = Network::new(
        config,
        default_registry().unwrap(),
        prelu_relu_net(Dims4::new(1, 1, 1, 4), true),
        &prelu_weights("prelu1", &[0.5]),
    )
    .unwrap();
    assert!(net.placements().all(|(_, backend)| backend == Backend::Cpu));

    net.set_input("data", &[-2.0, 2.0, -4.0, 4.0]).unwrap();
    net.forward().unwrap();
    assert_eq!(net.output_nchw("act").unwrap(), [-1.0, 2.0, -2.0, 4.0]);
}

#[test]
fn test_missing_resource_fails_compilation() {
    let err = Network::new(
        cpu(),
        default_registry().unwrap(),
        prelu_relu_net(Dims4::new(1, 1, 1, 1), true),
        &NetResource::default(),
    )
    .err();
    assert_eq!(err, Some(AccError::ResourceMissing(LayerType::PRelu)));
}

/// Binds like any kernel, then rejects every run with a fatal error.
#[derive(Default)]
struct RejectingAcc;

impl LayerAcc for RejectingAcc {
    fn layer_type(&self) -> LayerType {
        LayerType::Scale
    }

    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn init(
        &mut self,
        _param: Option<Arc<LayerParam>>,
        _resource: Option<Arc<LayerResource>>,
        _inputs: &[BlobDesc],
        _outputs: &[BlobDesc],
    ) -> Result<()> {
        Ok(())
    }

    fn forward(&self, _inputs: &[&Blob], outputs: &mut [Blob]) -> Result<()> {
        Err(AccError::UnsupportedDataType {
            layer: LayerType::Scale,
            output: outputs[0].data_type(),
            resource: None,
        })
    }
}

#[test]
fn test_failed_run_discards_outputs() {
    let mut builder = RegistryBuilder::new();
    layer_acc::ops::cpu::register_cpu_kernels(&mut builder).unwrap();
    let registry = builder.build();

    let dims = Dims4::new(1, 3, 2, 2);
    let mut net = Network::new(
        cpu(),
        &registry,
        prelu_relu_net(dims, true),
        &prelu_weights("prelu1", &[0.1]),
    )
    .unwrap();
    net.set_input("data", &[1.0; 12]).unwrap();
    net.forward().unwrap();
    assert!(net.output("out").is_some());

    // a rejected input leaves the network without a completed run
    assert!(matches!(
        net.set_input("data", &[1.0; 5]),
        Err(AccError::BufferTooSmall { .. })
    ));
    assert!(net.output("out").is_none());

    let mut builder = RegistryBuilder::new();
    builder
        .register(Backend::Cpu, LayerType::PRelu, || {
            Box::new(layer_acc::ops::cpu::CpuPReluLayerAcc::default())
        })
        .unwrap();
    builder
        .register(Backend::Cpu, LayerType::Scale, || Box::new(RejectingAcc))
        .unwrap();
    let registry = builder.build();
    let structure = NetStructure {
        inputs: vec![("data".into(), dims)],
        layers: vec![
            LayerInfo::unary("prelu1", LayerType::PRelu, "data", "act")
                .with_param(LayerParam::PRelu(PReluLayerParam { channel_shared: true })),
            LayerInfo::unary("broken", LayerType::Scale, "act", "out"),
        ],
    };
    let weights = prelu_weights("prelu1", &[0.1]);
    let mut net = Network::new(cpu(), &registry, structure, &weights).unwrap();
    net.set_input("data", &[-1.0; 12]).unwrap();
    let err = net.forward().unwrap_err();
    assert!(err.is_fatal());
    assert!(net.output("act").is_none());
    assert!(net.output("out").is_none());
}

#[test]
fn test_low_precision_runs_the_compact_path() {
    let mut rng = StdRng::seed_from_u64(9);
    let dims = Dims4::new(2, 5, 3, 3);
    let input: Vec<f32> = (0..dims.count()).map(|_| rng.random_range(-4.0f32..4.0)).collect();
    let slopes = [0.1f32, 0.2, 0.3, 0.4, 0.5];

    let run = |precision| {
        let config = NetworkConfig { precision, ..cpu() };
        let mut net = Network::new(
            config,
            default_registry().unwrap(),
            prelu_relu_net(dims, false),
            &prelu_weights("prelu1", &slopes),
        )
        .unwrap();
        net.set_input("data", &input).unwrap();
        net.forward().unwrap();
        let dt = net.output("act").unwrap().data_type();
        (dt, net.output_nchw("act").unwrap())
    };

    let (high_type, high) = run(Precision::High);
    let (low_type, low) = run(Precision::Low);
    assert_eq!(high_type, DataType::Float);
    assert_eq!(low_type, DataType::Bfp16);
    assert!(approx_within(low.as_slice(), high.as_slice(), ApproxEquality::Compact));
}

#[test]
fn test_unit_scale_is_identity() {
    let mut rng = StdRng::seed_from_u64(13);
    let dims = Dims4::new(1, 6, 2, 3);
    let input: Vec<f32> = (0..dims.count()).map(|_| rng.random_range(-1.0f32..1.0)).collect();

    let mut weights = NetResource::default();
    weights.insert(
        "scale1",
        LayerResource::Scale(ScaleLayerResource {
            scale: RawBuffer::from_slice(&[1.0f32; 6]),
            bias: Some(RawBuffer::from_slice(&[0.0f32; 6])),
        }),
    );
    let structure = NetStructure {
        inputs: vec![("data".into(), dims)],
        layers: vec![
            LayerInfo::unary("scale1", LayerType::Scale, "data", "out").with_param(
                LayerParam::Scale(ScaleLayerParam {
                    channel_shared: false,
                    bias_term: true,
                }),
            ),
        ],
    };

    let mut net = Network::new(cpu(), default_registry().unwrap(), structure, &weights).unwrap();
    net.set_input("data", &input).unwrap();
    net.forward().unwrap();
    assert!(approx_eq(net.output_nchw("out").unwrap().as_slice(), input.as_slice()));
}

#[test]
fn test_pack_round_trip_keeps_logical_values() {
    let mut rng = StdRng::seed_from_u64(21);
    for c in [1, 2, 3, 4, 5, 8, 13] {
        let desc = BlobDesc::new(Dims4::new(2, c, 3, 4));
        let input: Vec<f32> = (0..desc.dims.count()).map(|_| rng.random()).collect();
        let blob = Blob::from_nchw(desc, &input).unwrap();
        assert_eq!(blob.handle().len(), desc.layout().total_elements());
        assert_eq!(blob.to_nchw().unwrap(), input);
    }
}
