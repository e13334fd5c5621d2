//! Utilities.
use anyhow::Result;
use log::trace;
use std::{collections::HashMap, path::Path};
use tch::{nn::VarStore, Tensor};

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarStore, src: &VarStore, tau: f64) -> Result<()> {
    let src = src.variables();
    let mut dest = dest.variables();
    debug_assert_eq!(src.len(), dest.len());

    tch::no_grad(|| -> Result<()> {
        for (name, src) in src.iter() {
            let dest = dest
                .get_mut(name)
                .ok_or_else(|| anyhow::anyhow!("Variable {} not found in target", name))?;
            dest.copy_(&(tau * src + (1.0 - tau) * &*dest));
        }
        Ok(())
    })?;
    trace!("soft update with tau = {}", tau);
    Ok(())
}

/// Copies all variables of `src` into `dest`.
pub fn hard_update(dest: &mut VarStore, src: &VarStore) -> Result<()> {
    dest.copy(src)?;
    trace!("hard update of {} variables", src.variables().len());
    Ok(())
}

/// Saves the variables of several var stores into a single file.
///
/// The name of each variable is prefixed with the key of its var store.
pub fn save_var_stores<T: AsRef<Path>>(stores: &[(&str, &VarStore)], path: T) -> Result<()> {
    let named = stores
        .iter()
        .flat_map(|(key, vs)| {
            vs.variables()
                .into_iter()
                .map(move |(name, t)| (format!("{}.{}", key, name), t))
        })
        .collect::<Vec<_>>();
    Tensor::save_multi(&named, &path)?;
    for (name, _) in named.iter() {
        trace!("Save variable {}", name);
    }
    Ok(())
}

/// Loads variables saved with [`save_var_stores`] in place.
pub fn load_var_stores<T: AsRef<Path>>(stores: &[(&str, &VarStore)], path: T) -> Result<()> {
    let named = Tensor::load_multi(&path)?
        .into_iter()
        .collect::<HashMap<_, _>>();

    tch::no_grad(|| -> Result<()> {
        for (key, vs) in stores.iter() {
            for (name, mut t) in vs.variables() {
                let name = format!("{}.{}", key, name);
                let src = named
                    .get(&name)
                    .ok_or_else(|| anyhow::anyhow!("Variable {} not found in {:?}", name, path.as_ref()))?;
                t.copy_(src);
            }
        }
        Ok(())
    })
}

/// Returns a scalar loss as `f32`.
pub(crate) fn scalar(t: &Tensor) -> f32 {
    t.double_value(&[]) as f32
}
