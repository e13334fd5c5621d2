use super::ClassifierConfig;
use crate::{
    mlp::{Mlp, MlpConfig},
    opt::Optimizer,
    regularizer::{GradientSource, ParamTable, Regularizer, Sample, TaskContext},
    util::scalar,
};
use anyhow::Result;
use clrl_core::{
    error::ClrlError,
    record::{Record, RecordValue},
};
use log::info;
use std::path::Path;
use tch::{nn, no_grad, Device, Kind, Tensor};

/// Cross entropy of the network on labelled samples.
///
/// With active classes, logits are restricted to those columns and labels index
/// into the active classes.
struct CrossEntropy<'a> {
    mlp: &'a Mlp,
    active: Option<Tensor>,
}

impl<'a> CrossEntropy<'a> {
    fn logits(&self, x: &Tensor) -> Tensor {
        let logits = self.mlp.forward(x);
        match &self.active {
            Some(ixs) => logits.index_select(1, ixs),
            None => logits,
        }
    }
}

impl<'a> GradientSource for CrossEntropy<'a> {
    fn loss(&self, sample: &Sample) -> Tensor {
        let logits = self.logits(&sample.x);
        match &sample.y {
            Some(y) => logits.cross_entropy_for_logits(y),
            None => logits.sum(Kind::Float) * 0.0,
        }
    }
}

/// The labelled data of the task just finished.
struct ClassifierTaskContext<'a> {
    loss: CrossEntropy<'a>,
    data: Sample,
}

impl<'a> GradientSource for ClassifierTaskContext<'a> {
    fn loss(&self, sample: &Sample) -> Tensor {
        self.loss.loss(sample)
    }
}

impl<'a> TaskContext for ClassifierTaskContext<'a> {
    /// Batches of `n_steps` samples drawn uniformly from the task data.
    fn rollouts(&mut self, n_iters: usize, n_steps: usize) -> Result<Vec<Sample>> {
        let n = self.data.len() as i64;
        let rollouts = (0..n_iters)
            .map(|_| {
                let ixs = Tensor::randint(n, &[n_steps as i64], (Kind::Int64, Device::Cpu));
                self.data.index_select(&ixs)
            })
            .collect();
        Ok(rollouts)
    }

    fn task_samples(&mut self, n: usize) -> Result<Sample> {
        let len = self.data.len() as i64;
        let ixs = Tensor::randperm(len, (Kind::Int64, Device::Cpu)).narrow(0, 0, len.min(n as i64));
        Ok(self.data.index_select(&ixs))
    }
}

/// A classifier with two hidden layers trained over a sequence of tasks.
pub struct Classifier {
    var_store: nn::VarStore,
    mlp: Mlp,
    opt: Optimizer,
    regularizer: Option<Regularizer>,
    device: Device,
}

impl Classifier {
    /// Constructs a classifier.
    pub fn build(config: ClassifierConfig) -> Result<Self> {
        if config.in_dim <= 0 || config.classes <= 0 || config.hidden_units <= 0 {
            return Err(ClrlError::Config(format!(
                "in_dim = {}, hidden_units = {}, classes = {}",
                config.in_dim, config.hidden_units, config.classes
            ))
            .into());
        }
        let device = config
            .device
            .map(tch::Device::from)
            .unwrap_or_else(Device::cuda_if_available);
        let var_store = nn::VarStore::new(device);
        let mlp_config = MlpConfig::new(
            config.in_dim,
            vec![config.hidden_units, config.hidden_units],
            config.classes,
            false,
        );
        let mlp = Mlp::build(&(var_store.root() / "trunk"), mlp_config);
        let opt = config.opt_config.build(&var_store)?;
        let regularizer = match &config.regularizer_config {
            Some(c) => Some(c.build(ParamTable::from_var_store(&var_store))?),
            None => None,
        };

        Ok(Self {
            var_store,
            mlp,
            opt,
            regularizer,
            device,
        })
    }

    /// Logits of all classes.
    pub fn forward(&self, x: &Tensor) -> Tensor {
        self.mlp.forward(&x.to_device(self.device).flatten(1, -1))
    }

    /// The regularizer, if enabled.
    pub fn regularizer(&self) -> Option<&Regularizer> {
        self.regularizer.as_ref()
    }

    fn to_sample(&self, x: &Tensor, y: &Tensor) -> Result<Sample> {
        if x.size()[0] != y.size()[0] {
            return Err(ClrlError::ShapeMismatch(format!(
                "{} inputs and {} labels",
                x.size()[0],
                y.size()[0]
            ))
            .into());
        }
        Ok(Sample::new(
            x.to_device(self.device).flatten(1, -1),
            Some(y.to_device(self.device).to_kind(Kind::Int64)),
        ))
    }

    /// Performs an optimization step on a batch.
    ///
    /// `y` holds indices into `active_classes` if given, otherwise into all classes.
    pub fn train_batch(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        active_classes: Option<&[i64]>,
    ) -> Result<Record> {
        let sample = self.to_sample(x, y)?;
        let mut record = Record::empty();
        self.opt.zero_grad();

        let (loss, precision) = {
            let src = CrossEntropy {
                mlp: &self.mlp,
                active: active_tensor(active_classes, self.device),
            };
            let logits = src.logits(&sample.x);
            let loss = src.loss(&sample);
            let precision = match &sample.y {
                Some(y) => precision_of(&logits, y),
                None => 0.0,
            };

            let total = match self.regularizer.as_mut() {
                Some(reg) => {
                    reg.before_backward(&src)?;
                    let penalty = reg.penalty();
                    record.insert("penalty", RecordValue::Scalar(scalar(&penalty)));
                    &loss + reg.strength() * penalty
                }
                None => loss.shallow_clone(),
            };
            total.backward();
            record.insert("loss_total", RecordValue::Scalar(scalar(&total)));
            (loss, precision)
        };

        if let Some(reg) = self.regularizer.as_mut() {
            if reg.adjust_gradient() {
                record.insert("agem_projected", RecordValue::Scalar(1.0));
            }
        }
        self.opt.step();
        if let Some(reg) = self.regularizer.as_mut() {
            reg.after_step();
        }

        record.insert("loss_pred", RecordValue::Scalar(scalar(&loss)));
        record.insert("precision", RecordValue::Scalar(precision));
        Ok(record)
    }

    /// Ratio of correctly classified samples.
    pub fn precision(&self, x: &Tensor, y: &Tensor, active_classes: Option<&[i64]>) -> Result<f32> {
        let sample = self.to_sample(x, y)?;
        let src = CrossEntropy {
            mlp: &self.mlp,
            active: active_tensor(active_classes, self.device),
        };
        let logits = no_grad(|| src.logits(&sample.x));
        Ok(match &sample.y {
            Some(y) => precision_of(&logits, y),
            None => 0.0,
        })
    }

    /// Consolidates the task whose labelled data is `(x, y)`.
    pub fn on_task_boundary(
        &mut self,
        x: &Tensor,
        y: &Tensor,
        active_classes: Option<&[i64]>,
    ) -> Result<Record> {
        let data = self.to_sample(x, y)?;
        let reg = match self.regularizer.as_mut() {
            Some(reg) => reg,
            None => return Ok(Record::empty()),
        };
        let loss = CrossEntropy {
            mlp: &self.mlp,
            active: active_tensor(active_classes, self.device),
        };
        let mut ctx = ClassifierTaskContext { loss, data };
        let record = reg.on_task_boundary(&mut ctx)?;
        info!("Classifier consolidated task {}", reg.task_count() - 1);
        Ok(record)
    }

    /// Save the parameters and the state of the regularizer in a directory.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        self.var_store.save(path.join("classifier.pt.tch"))?;
        if let Some(reg) = &self.regularizer {
            reg.save(path.join("regularizer.pt.tch"))?;
        }
        info!("Save classifier to {:?}", path);
        Ok(())
    }

    /// Load the parameters and the state of the regularizer from a directory.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.var_store.load(path.join("classifier.pt.tch"))?;
        if let Some(reg) = self.regularizer.as_mut() {
            reg.load(path.join("regularizer.pt.tch"))?;
        }
        info!("Load classifier from {:?}", path);
        Ok(())
    }
}

fn active_tensor(active_classes: Option<&[i64]>, device: Device) -> Option<Tensor> {
    active_classes.map(|c| Tensor::from_slice(c).to_device(device))
}

fn precision_of(logits: &Tensor, y: &Tensor) -> f32 {
    let pred = logits.argmax(-1, false);
    scalar(&pred.eq_tensor(y).to_kind(Kind::Float).mean(Kind::Float))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regularizer::{AgemConfig, EwcConfig, RegularizerConfig};
    use tch::kind::FLOAT_CPU;

    // Class `c` is centered at `4 * e_c` in 4 dimensions.
    fn blobs(classes: &[i64], n: i64) -> (Tensor, Tensor) {
        let y = Tensor::from_slice(classes).repeat(&[n]);
        let centers = Tensor::eye(4, FLOAT_CPU) * 4.0;
        let x = centers.index_select(0, &y) + Tensor::randn(&[y.size()[0], 4], FLOAT_CPU) * 0.1;
        (x, y)
    }

    fn config() -> ClassifierConfig {
        ClassifierConfig::default()
            .dims(4, 4)
            .hidden_units(16)
            .device(Device::Cpu)
    }

    #[test]
    fn test_learns_separable_classes() -> Result<()> {
        tch::manual_seed(0);
        let mut classifier = Classifier::build(config())?;
        let (x, y) = blobs(&[0, 1, 2, 3], 16);
        for _ in 0..200 {
            let record = classifier.train_batch(&x, &y, None)?;
            assert!(record.get("loss_total").is_some());
        }
        assert!(classifier.precision(&x, &y, None)? > 0.9);
        Ok(())
    }

    #[test]
    fn test_active_classes_restrict_logits() -> Result<()> {
        tch::manual_seed(0);
        let mut classifier = Classifier::build(config())?;
        // Labels index into the active classes [2, 3].
        let (x, y) = blobs(&[2, 3], 16);
        let y = y - 2;
        for _ in 0..100 {
            classifier.train_batch(&x, &y, Some(&[2, 3]))?;
        }
        assert!(classifier.precision(&x, &y, Some(&[2, 3]))? > 0.9);
        Ok(())
    }

    #[test]
    fn test_label_count_mismatch() -> Result<()> {
        let mut classifier = Classifier::build(config())?;
        let x = Tensor::zeros(&[3, 4], FLOAT_CPU);
        let y = Tensor::from_slice(&[0i64, 1]);
        let err = classifier.train_batch(&x, &y, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClrlError>(),
            Some(ClrlError::ShapeMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_ewc_penalty_after_boundary() -> Result<()> {
        tch::manual_seed(0);
        let reg = RegularizerConfig::Ewc(EwcConfig::default().fisher_iters(4).rollout_steps(8));
        let mut classifier = Classifier::build(config().regularizer_config(reg))?;
        let (x0, y0) = blobs(&[0, 1], 16);
        for _ in 0..50 {
            let record = classifier.train_batch(&x0, &y0, None)?;
            assert_eq!(record.get("penalty"), Some(&RecordValue::Scalar(0.0)));
        }
        let record = classifier.on_task_boundary(&x0, &y0, None)?;
        assert!(record.get("fisher_mean").is_some());

        let (x1, y1) = blobs(&[2, 3], 16);
        classifier.train_batch(&x1, &y1, None)?;
        let record = classifier.train_batch(&x1, &y1, None)?;
        match record.get("penalty") {
            Some(RecordValue::Scalar(p)) => assert!(*p > 0.0),
            _ => panic!("penalty is missing"),
        }
        Ok(())
    }

    #[test]
    fn test_agem_keeps_memory_within_budget() -> Result<()> {
        let reg = RegularizerConfig::Agem(AgemConfig::default().memory_budget(20).ref_grad_batch_size(8));
        let mut classifier = Classifier::build(config().regularizer_config(reg))?;
        for classes in [[0i64, 1], [2, 3]].iter() {
            let (x, y) = blobs(classes, 16);
            for _ in 0..5 {
                classifier.train_batch(&x, &y, None)?;
            }
            let record = classifier.on_task_boundary(&x, &y, None)?;
            assert_eq!(record.get("memory_size"), Some(&RecordValue::Scalar(20.0)));
        }
        match classifier.regularizer() {
            Some(Regularizer::Agem(agem)) => {
                assert_eq!(agem.memory().num_tasks(), 2);
                assert!(agem.memory().tasks().iter().all(|s| s.len() == 10));
            }
            _ => panic!("AGEM is expected"),
        }
        Ok(())
    }

    #[test]
    fn test_save_load() -> Result<()> {
        let tmp = tempdir::TempDir::new("classifier")?;
        let reg = RegularizerConfig::Agem(AgemConfig::default().memory_budget(8));
        let mut classifier = Classifier::build(config().regularizer_config(reg.clone()))?;
        let (x, y) = blobs(&[0, 1], 4);
        classifier.train_batch(&x, &y, None)?;
        classifier.on_task_boundary(&x, &y, None)?;
        classifier.save(tmp.path())?;

        let mut classifier2 = Classifier::build(config().regularizer_config(reg))?;
        classifier2.load(tmp.path())?;
        assert!(classifier.forward(&x).equal(&classifier2.forward(&x)));
        assert_eq!(classifier2.regularizer().map(|r| r.task_count()), Some(1));
        Ok(())
    }
}
