use super::MlpConfig;
use tch::{nn, nn::Module, Device, Tensor};

/// Multilayer perceptron with ReLU activation function.
#[derive(Debug)]
pub struct Mlp {
    config: MlpConfig,
    device: Device,
    seq: nn::Sequential,
}

impl Mlp {
    fn create_net(p: &nn::Path, config: &MlpConfig) -> nn::Sequential {
        let mut seq = nn::seq();
        let mut in_dim = config.in_dim;

        for (i, &out_dim) in config.units.iter().enumerate() {
            seq = seq.add(nn::linear(
                p / format!("{}{}", "ln", i),
                in_dim,
                out_dim,
                Default::default(),
            ));
            seq = seq.add_fn(|x| x.relu());
            in_dim = out_dim;
        }

        seq = seq.add(nn::linear(
            p / format!("{}{}", "ln", config.units.len()),
            in_dim,
            config.out_dim,
            Default::default(),
        ));

        if config.activation_out {
            seq = seq.add_fn(|x| x.relu());
        }

        seq
    }

    /// Builds the network with variables under `p`.
    pub fn build(p: &nn::Path, config: MlpConfig) -> Self {
        let device = p.device();
        let seq = Self::create_net(p, &config);

        Self {
            config,
            device,
            seq,
        }
    }

    /// Forward computation.
    pub fn forward(&self, x: &Tensor) -> Tensor {
        self.seq.forward(&x.to(self.device))
    }

    /// Forward computation on the concatenation of two inputs along the last axis.
    pub fn forward2(&self, x1: &Tensor, x2: &Tensor) -> Tensor {
        let input = Tensor::cat(&[x1.to(self.device), x2.to(self.device)], -1);
        self.seq.forward(&input)
    }

    /// Configuration.
    pub fn config(&self) -> &MlpConfig {
        &self.config
    }
}
