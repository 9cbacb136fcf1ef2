//! Minimal network harness.
//!
//! Compiles a linear list of layers against a [`KernelRegistry`] and runs them in the
//! order given. It is the smallest caller that exercises the whole kernel contract:
//!
//! - compile: resolve `(device, operator)` to a kernel, allocate blobs, `init`
//! - run: `forward` layer by layer, stop at the first failure
//!
//! A run that fails leaves no outputs visible: [`Network::output`] returns `None`
//! until a later run completes.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crate::backend::{Backend, get_backend};
use crate::buffer::{Blob, BlobDesc};
use crate::error::{AccError, Result};
use crate::layer::{LayerParam, LayerResource, LayerType};
use crate::layout::Dims4;
use crate::ops::LayerAcc;
use crate::precision::Precision;
use crate::registry::KernelRegistry;

/// One node of the network.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Unique layer name, also the key of its resource.
    pub name: String,
    /// Operator type.
    pub layer_type: LayerType,
    /// Input blob names.
    pub inputs: Vec<String>,
    /// Output blob names.
    pub outputs: Vec<String>,
    /// Scalar configuration.
    pub param: Option<Arc<LayerParam>>,
}

impl LayerInfo {
    /// A one-in, one-out node.
    pub fn unary(
        name: impl Into<String>,
        layer_type: LayerType,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            layer_type,
            inputs: vec![input.into()],
            outputs: vec![output.into()],
            param: None,
        }
    }

    /// Same node with a parameter.
    #[must_use]
    pub fn with_param(mut self, param: LayerParam) -> Self {
        self.param = Some(Arc::new(param));
        self
    }
}

/// Network inputs and layers, in execution order.
#[derive(Debug, Clone, Default)]
pub struct NetStructure {
    /// Input blob names and their dims.
    pub inputs: Vec<(String, Dims4)>,
    /// Layers, run in this order.
    pub layers: Vec<LayerInfo>,
}

/// Weights of a network, keyed by layer name.
#[derive(Debug, Clone, Default)]
pub struct NetResource {
    resources: HashMap<String, Arc<LayerResource>>,
}

impl NetResource {
    /// Attaches `resource` to the layer called `layer`.
    pub fn insert(&mut self, layer: impl Into<String>, resource: LayerResource) -> &mut Self {
        self.resources.insert(layer.into(), Arc::new(resource));
        self
    }

    /// Resource of the layer called `layer`.
    #[must_use]
    pub fn get(&self, layer: &str) -> Option<Arc<LayerResource>> {
        self.resources.get(layer).cloned()
    }
}

/// Where and how a network runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Primary device.
    pub backend: Backend,
    /// Device used for layers the primary device has no kernel for.
    pub fallback: Option<Backend>,
    /// Blob precision policy.
    pub precision: Precision,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            backend: get_backend(),
            fallback: None,
            precision: Precision::default(),
        }
    }
}

struct CompiledLayer {
    info: LayerInfo,
    acc: Box<dyn LayerAcc>,
}

/// A compiled network.
pub struct Network {
    layers: Vec<CompiledLayer>,
    inputs: Vec<String>,
    blobs: HashMap<String, Blob>,
    completed: bool,
}

fn lookup<'a>(descs: &'a HashMap<String, BlobDesc>, name: &str) -> Result<&'a BlobDesc> {
    descs.get(name).ok_or_else(|| AccError::UnknownBlob(name.to_string()))
}

fn resolve(
    config: &NetworkConfig,
    registry: &KernelRegistry,
    layer: LayerType,
) -> Result<Box<dyn LayerAcc>> {
    match (registry.create(config.backend, layer), config.fallback) {
        (Err(AccError::UnsupportedDevice { backend, .. }), Some(fallback)) => {
            log::warn!("no {layer} kernel on {backend}, falling back to {fallback}");
            registry.create(fallback, layer)
        }
        (result, _) => result,
    }
}

fn run_layer(layer: &CompiledLayer, blobs: &mut HashMap<String, Blob>) -> Result<()> {
    let info = &layer.info;
    // in-place layers read a copy of the blob they overwrite
    let aliased = info
        .inputs
        .iter()
        .filter(|name| info.outputs.contains(*name))
        .map(|name| {
            blobs
                .get(name)
                .map(|blob| (name.as_str(), blob.clone()))
                .ok_or_else(|| AccError::UnknownBlob(name.clone()))
        })
        .collect::<Result<HashMap<&str, Blob>>>()?;

    let mut outputs = info
        .outputs
        .iter()
        .map(|name| {
            blobs
                .get_mut(name)
                .map(mem::take)
                .ok_or_else(|| AccError::UnknownBlob(name.clone()))
        })
        .collect::<Result<Vec<Blob>>>()?;

    let result = info
        .inputs
        .iter()
        .map(|name| {
            aliased
                .get(name.as_str())
                .or_else(|| blobs.get(name))
                .ok_or_else(|| AccError::UnknownBlob(name.clone()))
        })
        .collect::<Result<Vec<&Blob>>>()
        .and_then(|inputs| layer.acc.forward(&inputs, &mut outputs));

    for (name, blob) in info.outputs.iter().zip(outputs) {
        if let Some(slot) = blobs.get_mut(name) {
            *slot = blob;
        }
    }
    result
}

impl Network {
    /// Resolves, allocates and initializes every layer.
    ///
    /// A layer may write one of its own inputs (`relu data -> data`); it then reads
    /// the value the blob held before the layer ran.
    ///
    /// # Errors
    ///
    /// The first failure of kernel lookup, blob resolution, allocation or `init`.
    pub fn new(
        config: NetworkConfig,
        registry: &KernelRegistry,
        structure: NetStructure,
        resource: &NetResource,
    ) -> Result<Self> {
        let data_type = config.precision.blob_data_type(config.backend);
        let mut descs: HashMap<String, BlobDesc> = structure
            .inputs
            .iter()
            .map(|(name, dims)| {
                let desc = BlobDesc::new(*dims)
                    .with_data_type(data_type)
                    .with_backend(config.backend);
                (name.clone(), desc)
            })
            .collect();

        let mut layers = Vec::with_capacity(structure.layers.len());
        for info in structure.layers {
            let mut acc = resolve(&config, registry, info.layer_type)?;

            let inputs = info
                .inputs
                .iter()
                .map(|name| lookup(&descs, name).copied())
                .collect::<Result<Vec<BlobDesc>>>()?;
            let first = inputs.first().ok_or(AccError::BlobCount {
                layer: info.layer_type,
                kind: "input",
                expected: 1,
                actual: 0,
            })?;
            let output_desc = first.with_backend(acc.backend());
            let outputs = vec![output_desc; info.outputs.len()];

            acc.init(info.param.clone(), resource.get(&info.name), &inputs, &outputs)?;
            log::debug!(
                "compiled layer `{}` ({}) on {}",
                info.name,
                info.layer_type,
                acc.backend()
            );

            for name in &info.outputs {
                descs.insert(name.clone(), output_desc);
            }
            layers.push(CompiledLayer { info, acc });
        }

        let blobs = descs
            .into_iter()
            .map(|(name, desc)| Blob::new(desc).map(|blob| (name, blob)))
            .collect::<Result<HashMap<String, Blob>>>()?;

        Ok(Self {
            layers,
            inputs: structure.inputs.into_iter().map(|(name, _)| name).collect(),
            blobs,
            completed: false,
        })
    }

    /// Device each layer was placed on, in execution order.
    pub fn placements(&self) -> impl Iterator<Item = (&str, Backend)> {
        self.layers
            .iter()
            .map(|l| (l.info.name.as_str(), l.acc.backend()))
    }

    /// Fills a network input from an NCHW tensor.
    ///
    /// # Errors
    ///
    /// [`AccError::UnknownBlob`] if `name` is not a network input, or the error of
    /// [`Blob::write_nchw`].
    pub fn set_input(&mut self, name: &str, nchw: &[f32]) -> Result<()> {
        if !self.inputs.iter().any(|n| n == name) {
            return Err(AccError::UnknownBlob(name.to_string()));
        }
        let blob = self
            .blobs
            .get_mut(name)
            .ok_or_else(|| AccError::UnknownBlob(name.to_string()))?;
        self.completed = false;
        blob.write_nchw(nchw)
    }

    /// Runs every layer in order.
    ///
    /// # Errors
    ///
    /// The first layer failure. Fatal errors are also logged at `error` level.
    pub fn forward(&mut self) -> Result<()> {
        self.completed = false;
        for layer in &self.layers {
            if let Err(err) = run_layer(layer, &mut self.blobs) {
                if err.is_fatal() {
                    log::error!("layer `{}` aborted the run: {err}", layer.info.name);
                } else {
                    log::debug!("layer `{}` failed: {err}", layer.info.name);
                }
                return Err(err);
            }
        }
        self.completed = true;
        Ok(())
    }

    /// A blob after a completed run; `None` if the last run failed or none ran yet.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&Blob> {
        if !self.completed {
            return None;
        }
        self.blobs.get(name)
    }

    /// [`Network::output`] converted to NCHW `f32`.
    ///
    /// # Errors
    ///
    /// [`AccError::UnknownBlob`] when [`Network::output`] would return `None`.
    pub fn output_nchw(&self, name: &str) -> Result<Vec<f32>> {
        self.output(name)
            .ok_or_else(|| AccError::UnknownBlob(name.to_string()))?
            .to_nchw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;

    fn relu_net(dims: Dims4) -> NetStructure {
        NetStructure {
            inputs: vec![("data".into(), dims)],
            layers: vec![LayerInfo::unary("relu1", LayerType::Relu, "data", "out")],
        }
    }

    #[test]
    fn unknown_blobs_fail_compilation() {
        let mut structure = relu_net(Dims4::new(1, 1, 1, 4));
        structure.layers[0].inputs = vec!["missing".into()];
        let err = Network::new(
            NetworkConfig::default(),
            default_registry().unwrap(),
            structure,
            &NetResource::default(),
        )
        .err();
        assert_eq!(err, Some(AccError::UnknownBlob("missing".into())));
    }

    #[test]
    fn default_config_starts_from_the_process_backend() {
        let config = NetworkConfig::default();
        assert_eq!(config.backend, get_backend());
        assert_eq!(config.fallback, None);
        assert_eq!(config.precision, Precision::Auto);
    }

    #[test]
    fn outputs_are_hidden_until_a_run_completes() {
        let config = NetworkConfig {
            backend: Backend::Cpu,
            ..NetworkConfig::default()
        };
        let mut net = Network::new(
            config,
            default_registry().unwrap(),
            relu_net(Dims4::new(1, 1, 1, 4)),
            &NetResource::default(),
        )
        .unwrap();
        assert!(net.output("out").is_none());

        net.set_input("data", &[-1.0, 1.0, -2.0, 2.0]).unwrap();
        net.forward().unwrap();
        assert_eq!(net.output_nchw("out").unwrap(), [0.0, 1.0, 0.0, 2.0]);

        assert!(matches!(net.set_input("out", &[0.0; 4]), Err(AccError::UnknownBlob(_))));
    }
}
