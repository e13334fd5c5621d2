use tch::{nn::VarStore, Device, Kind, Tensor};

/// Trainable variables of a [`VarStore`] in a fixed order.
///
/// The order is computed once, by variable name, and shared by every flatten
/// and scatter of gradients. Tensors are shallow clones of the variables, so
/// gradients populated by autodiff are visible through the table.
pub struct ParamTable {
    params: Vec<(String, Tensor)>,
    device: Device,
}

impl ParamTable {
    /// Collects the trainable variables of `vs`.
    pub fn from_var_store(vs: &VarStore) -> Self {
        let mut params = vs
            .variables()
            .into_iter()
            .filter(|(_, t)| t.requires_grad())
            .collect::<Vec<_>>();
        params.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            params,
            device: vs.device(),
        }
    }

    /// Device of the variables.
    pub fn device(&self) -> Device {
        self.device
    }

    /// The number of variables.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Returns `true` if the table has no variables.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn numel(&self) -> usize {
        self.params.iter().map(|(_, p)| p.numel()).sum()
    }

    /// Iterates over `(name, variable)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.params.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Names of the variables.
    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Position of the variable `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|(n, _)| n == name)
    }

    /// Detached copies of the current values.
    pub fn snapshot(&self) -> Vec<Tensor> {
        tch::no_grad(|| self.params.iter().map(|(_, p)| p.detach().copy()).collect())
    }

    /// Zero tensors shaped like the variables.
    pub fn zeros_like(&self) -> Vec<Tensor> {
        self.params.iter().map(|(_, p)| p.zeros_like().detach()).collect()
    }

    /// Clears the gradients of the variables.
    pub fn zero_grad(&self) {
        for (_, p) in self.params.iter() {
            let mut g = p.grad();
            if g.defined() {
                let _ = g.detach_();
                let _ = g.zero_();
            }
        }
    }

    /// Detached copies of the gradients; undefined gradients are returned as zeros.
    pub fn grads(&self) -> Vec<Tensor> {
        self.params
            .iter()
            .map(|(_, p)| {
                let g = p.grad();
                if g.defined() {
                    g.detach().copy()
                } else {
                    p.zeros_like().detach()
                }
            })
            .collect()
    }

    /// Concatenation of all gradients in table order.
    pub fn flat_grad(&self) -> Tensor {
        let flat = self
            .grads()
            .iter()
            .map(|g| g.flatten(0, -1))
            .collect::<Vec<_>>();
        if flat.is_empty() {
            Tensor::zeros(&[0], (Kind::Float, self.device))
        } else {
            Tensor::cat(&flat, 0)
        }
    }

    /// Writes slices of `flat` back into the gradients in table order.
    ///
    /// Variables without a gradient are skipped, their slice is consumed all the same.
    pub fn scatter_grad(&self, flat: &Tensor) {
        tch::no_grad(|| {
            let mut offset = 0i64;
            for (_, p) in self.params.iter() {
                let n = p.numel() as i64;
                let mut g = p.grad();
                if g.defined() {
                    g.copy_(&flat.narrow(0, offset, n).view_as(&g));
                }
                offset += n;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;
    use tch::nn;

    #[test]
    fn test_flatten_and_scatter_share_order() -> anyhow::Result<()> {
        let vs = VarStore::new(Device::Cpu);
        let root = vs.root();
        let b = root.var("b", &[2], nn::Init::Const(1.0));
        let a = root.var("a", &[1], nn::Init::Const(2.0));
        let table = ParamTable::from_var_store(&vs);
        assert_eq!(table.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.numel(), 3);

        let loss = (&a * 3.0).sum(Kind::Float) + (&b * &b).sum(Kind::Float);
        loss.backward();
        assert_eq!(Vec::<f32>::try_from(&table.flat_grad())?, vec![3.0, 2.0, 2.0]);

        table.scatter_grad(&Tensor::from_slice(&[-1f32, 5.0, 6.0]));
        assert_eq!(Vec::<f32>::try_from(&a.grad())?, vec![-1.0]);
        assert_eq!(Vec::<f32>::try_from(&b.grad())?, vec![5.0, 6.0]);

        table.zero_grad();
        assert_eq!(Vec::<f32>::try_from(&table.flat_grad())?, vec![0.0; 3]);
        Ok(())
    }
}
