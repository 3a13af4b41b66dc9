//! Adam with L2 weight decay folded into the gradient.
//!
//! Unlike `candle_nn::AdamW` (decoupled decay) this adds `weight_decay * θ`
//! to the gradient before the moment updates. Moments are kept per named
//! variable so they can be written to and restored from a checkpoint.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

struct ParamState {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

pub struct Adam {
    params: Vec<ParamState>,
    step: u64,
    config: AdamParams,
}

impl Adam {
    pub fn new(vars: Vec<(String, Var)>, config: AdamParams) -> candle_core::Result<Self> {
        let params = vars
            .into_iter()
            .filter(|(_, var)| var.dtype().is_float())
            .map(|(name, var)| {
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(ParamState {
                    name,
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            params,
            step: 0,
            config,
        })
    }

    pub fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        self.step += 1;
        let AdamParams {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step as i32));

        for param in &self.params {
            let theta = &param.var;
            let Some(g) = grads.get(theta) else {
                continue;
            };

            let g = if weight_decay > 0.0 {
                (g + (theta.as_tensor() * weight_decay)?)?
            } else {
                g.clone()
            };

            let m = &param.first_moment;
            let v = &param.second_moment;
            let next_m = ((m.as_tensor() * beta1)? + (&g * (1.0 - beta1))?)?;
            let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;
            let update = (m_hat / (v_hat.sqrt()? + eps)?)?;
            let next_theta = (theta.as_tensor() - (update * lr)?)?;

            m.set(&next_m)?;
            v.set(&next_v)?;
            theta.set(&next_theta)?;
        }

        Ok(())
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }

    pub fn params(&self) -> &AdamParams {
        &self.config
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub(crate) fn set_step_count(&mut self, step: u64) {
        self.step = step;
    }

    pub(crate) fn set_params(&mut self, config: AdamParams) {
        self.config = config;
    }

    /// (name, first moment, second moment) for every optimized variable.
    pub fn moments(&self) -> impl Iterator<Item = (&str, &Tensor, &Tensor)> {
        self.params.iter().map(|p| {
            (
                p.name.as_str(),
                p.first_moment.as_tensor(),
                p.second_moment.as_tensor(),
            )
        })
    }

    /// Overwrite the moments of variable `name`. Returns `false` when no such
    /// variable is optimized.
    pub(crate) fn set_moments(&mut self, name: &str, m: &Tensor, v: &Tensor) -> candle_core::Result<bool> {
        match self.params.iter().find(|p| p.name == name) {
            Some(param) => {
                param.first_moment.set(m)?;
                param.second_moment.set(v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
