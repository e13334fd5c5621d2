//! Feature extractor shared by the critic and the self-supervised ensemble.
use anyhow::Result;
use clrl_core::error::ClrlError;
use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, Device, Tensor};

/// Configuration of [`Encoder`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct EncoderConfig {
    /// Dimension of observations.
    pub in_dim: i64,

    /// Units of the hidden layers.
    pub hidden_dim: i64,

    /// The number of hidden layers.
    pub num_layers: usize,

    /// Dimension of the feature vector.
    pub feature_dim: i64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            in_dim: 0,
            hidden_dim: 256,
            num_layers: 2,
            feature_dim: 50,
        }
    }
}

impl EncoderConfig {
    /// Sets the dimension of observations.
    pub fn in_dim(mut self, v: i64) -> Self {
        self.in_dim = v;
        self
    }

    /// Sets the units of the hidden layers.
    pub fn hidden_dim(mut self, v: i64) -> Self {
        self.hidden_dim = v;
        self
    }

    /// Sets the number of hidden layers.
    pub fn num_layers(mut self, v: usize) -> Self {
        self.num_layers = v;
        self
    }

    /// Sets the dimension of the feature vector.
    pub fn feature_dim(mut self, v: i64) -> Self {
        self.feature_dim = v;
        self
    }
}

/// Stack of ReLU layers followed by a `tanh` projection to the feature space.
///
/// The leading `num_shared_layers` layers may be tied to the layers of another encoder:
/// both encoders then hold handles on the same storage, and whoever owns the
/// [`nn::VarStore`] of those layers is responsible for saving them.
#[derive(Debug)]
pub struct Encoder {
    config: EncoderConfig,
    layers: Vec<nn::Linear>,
    fc: nn::Linear,
    num_shared_layers: usize,
    device: Device,
}

fn check_shared(num_shared_layers: usize, config: &EncoderConfig) -> Result<()> {
    if num_shared_layers > config.num_layers {
        return Err(ClrlError::Config(format!(
            "num_shared_layers ({}) exceeds num_layers ({})",
            num_shared_layers, config.num_layers
        ))
        .into());
    }
    Ok(())
}

fn tie(layer: &nn::Linear) -> nn::Linear {
    nn::Linear {
        ws: layer.ws.shallow_clone(),
        bs: layer.bs.as_ref().map(|bs| bs.shallow_clone()),
    }
}

impl Encoder {
    /// Builds an encoder owning all of its layers.
    pub fn build(p: &nn::Path, config: EncoderConfig) -> Self {
        let layers = Self::linear_layers(p, &config, 0..config.num_layers);
        let fc = Self::projection(p, &config);

        Self {
            config,
            layers,
            fc,
            num_shared_layers: 0,
            device: p.device(),
        }
    }

    /// Builds an encoder whose first `num_shared_layers` layers are those of `src`.
    ///
    /// Only the remaining layers are registered under `p`.
    pub fn build_sharing(p: &nn::Path, src: &Encoder, num_shared_layers: usize) -> Result<Self> {
        let config = src.config.clone();
        check_shared(num_shared_layers, &config)?;

        let mut layers = src.layers[..num_shared_layers]
            .iter()
            .map(tie)
            .collect::<Vec<_>>();
        layers.extend(Self::linear_layers(p, &config, num_shared_layers..config.num_layers));
        let fc = Self::projection(p, &config);

        Ok(Self {
            config,
            layers,
            fc,
            num_shared_layers,
            device: p.device(),
        })
    }

    /// Builds an encoder whose first `num_trunk_layers` layers are registered under
    /// `trunk` and the others under `p`.
    ///
    /// Encoders built with [`Encoder::build_sharing`] from this one can tie to the trunk.
    pub fn build_with_trunk(
        trunk: &nn::Path,
        p: &nn::Path,
        config: EncoderConfig,
        num_trunk_layers: usize,
    ) -> Result<Self> {
        check_shared(num_trunk_layers, &config)?;
        let mut layers = Self::linear_layers(trunk, &config, 0..num_trunk_layers);
        layers.extend(Self::linear_layers(p, &config, num_trunk_layers..config.num_layers));
        let fc = Self::projection(p, &config);

        Ok(Self {
            config,
            layers,
            fc,
            num_shared_layers: num_trunk_layers,
            device: p.device(),
        })
    }

    /// Hidden layers with indices in `range`, registered under `p`.
    fn linear_layers(
        p: &nn::Path,
        config: &EncoderConfig,
        range: std::ops::Range<usize>,
    ) -> Vec<nn::Linear> {
        range
            .map(|i| {
                let in_dim = if i == 0 {
                    config.in_dim
                } else {
                    config.hidden_dim
                };
                nn::linear(
                    p / format!("ln{}", i),
                    in_dim,
                    config.hidden_dim,
                    Default::default(),
                )
            })
            .collect()
    }

    fn projection(p: &nn::Path, config: &EncoderConfig) -> nn::Linear {
        let in_dim = if config.num_layers == 0 {
            config.in_dim
        } else {
            config.hidden_dim
        };
        nn::linear(p / "fc", in_dim, config.feature_dim, Default::default())
    }

    /// Computes features.
    ///
    /// If `detach_shared` is `true`, gradients do not flow into the tied layers.
    pub fn forward(&self, x: &Tensor, detach_shared: bool) -> Tensor {
        let mut h = x.to(self.device);
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h).relu();
            if detach_shared && i + 1 == self.num_shared_layers {
                h = h.detach();
            }
        }
        self.fc.forward(&h).tanh()
    }

    /// Dimension of the feature vector.
    pub fn feature_dim(&self) -> i64 {
        self.config.feature_dim
    }

    /// The number of layers tied to another encoder.
    pub fn num_shared_layers(&self) -> usize {
        self.num_shared_layers
    }

    /// Configuration.
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EncoderConfig {
        EncoderConfig::default()
            .in_dim(3)
            .hidden_dim(8)
            .num_layers(2)
            .feature_dim(4)
    }

    #[test]
    fn test_shared_layers_share_storage() -> Result<()> {
        let vs_src = nn::VarStore::new(Device::Cpu);
        let vs = nn::VarStore::new(Device::Cpu);
        let src = Encoder::build(&(vs_src.root() / "encoder"), config());
        let enc = Encoder::build_sharing(&(vs.root() / "member0"), &src, 1)?;

        // Only the non-shared layers are registered in the new var store.
        assert_eq!(vs.variables().len(), 4);

        let x = Tensor::ones(&[2, 3], tch::kind::FLOAT_CPU);
        let h1 = src.layers[0].forward(&x);
        let h2 = enc.layers[0].forward(&x);
        assert!(h1.equal(&h2));

        tch::no_grad(|| {
            let mut ws = src.layers[0].ws.shallow_clone();
            let _ = ws.fill_(0.5);
        });
        assert!(enc.layers[0].ws.equal(&src.layers[0].ws));
        Ok(())
    }

    #[test]
    fn test_trunk_layers_live_in_trunk_var_store() -> Result<()> {
        let vs_trunk = nn::VarStore::new(Device::Cpu);
        let vs = nn::VarStore::new(Device::Cpu);
        let enc = Encoder::build_with_trunk(&vs_trunk.root(), &vs.root(), config(), 1)?;

        assert_eq!(vs_trunk.variables().len(), 2);
        assert_eq!(vs.variables().len(), 4);
        assert_eq!(enc.num_shared_layers(), 1);
        let x = Tensor::ones(&[5, 3], tch::kind::FLOAT_CPU);
        assert_eq!(enc.forward(&x, false).size(), vec![5, 4]);
        Ok(())
    }

    #[test]
    fn test_too_many_shared_layers() {
        let vs = nn::VarStore::new(Device::Cpu);
        let src = Encoder::build(&vs.root(), config());
        let err = Encoder::build_sharing(&(vs.root() / "m"), &src, 3).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::Config(_))
        ));
    }

    #[test]
    fn test_detach_shared_blocks_gradient() -> Result<()> {
        let vs_src = nn::VarStore::new(Device::Cpu);
        let vs = nn::VarStore::new(Device::Cpu);
        let src = Encoder::build(&vs_src.root(), config());
        let enc = Encoder::build_sharing(&vs.root(), &src, 1)?;
        let x = Tensor::ones(&[2, 3], tch::kind::FLOAT_CPU);

        enc.forward(&x, true).sum(tch::Kind::Float).backward();
        assert!(!src.layers[0].ws.grad().defined());
        assert!(enc.layers[1].ws.grad().defined());

        enc.forward(&x, false).sum(tch::Kind::Float).backward();
        assert!(src.layers[0].ws.grad().defined());
        Ok(())
    }
}
