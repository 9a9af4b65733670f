//! Feed-forward value network over the local tile grid.
//!
//! Input is the flattened `(2v+1) x (2v+1)` grid, followed by `hidden_layers`
//! dense layers of `hidden_width` units and a linear head with one unbounded
//! output per button. Parameters are updated in place by an Adam optimizer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::codec::{side_for_vision, Grid};
use crate::error::{Error, Result};
use crate::policy::BUTTON_COUNT;
use crate::prng::Prng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Activation {
    Relu,
    Tanh,
}

impl Activation {
    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
        }
    }

    /// Derivative expressed through the pre-activation and the activation.
    #[inline]
    fn derivative(self, pre: f32, post: f32) -> f32 {
        match self {
            Activation::Relu => {
                if pre > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Tanh => 1.0 - post * post,
        }
    }

    pub(crate) fn code(self) -> u32 {
        match self {
            Activation::Relu => 0,
            Activation::Tanh => 1,
        }
    }

    pub(crate) fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Activation::Relu),
            1 => Some(Activation::Tanh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NetworkConfig {
    pub hidden_layers: usize,
    pub hidden_width: usize,
    pub activation: Activation,
    pub learning_rate: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_layers: 2,
            hidden_width: 64,
            activation: Activation::Relu,
            learning_rate: 1e-3,
        }
    }
}

/// Fully connected layer; `weights` is `[outputs, inputs]` row-major.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Dense {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl Dense {
    fn glorot(inputs: usize, outputs: usize, rng: &mut Prng) -> Self {
        let limit = (6.0 / (inputs + outputs) as f32).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| rng.gen_range_f32(-limit, limit))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            biases: vec![0.0; outputs],
        }
    }

    fn forward(&self, x: &[f32], out: &mut Vec<f32>) {
        out.clear();
        out.extend(self.biases.iter().copied());
        for (o, acc) in out.iter_mut().enumerate() {
            let row = &self.weights[o * self.inputs..(o + 1) * self.inputs];
            *acc += row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f32>();
        }
    }

    fn param_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

#[derive(Debug, Clone)]
struct DenseGrad {
    weights: Vec<f32>,
    biases: Vec<f32>,
}

/// Per-layer inputs and pre-activations kept for the backward pass.
struct ForwardTrace {
    inputs: Vec<Vec<f32>>,
    pre: Vec<Vec<f32>>,
    output: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: u64,
    m: Vec<DenseGrad>,
    v: Vec<DenseGrad>,
}

impl Adam {
    fn new(lr: f32, layers: &[Dense]) -> Self {
        let zeros = |l: &Dense| DenseGrad {
            weights: vec![0.0; l.weights.len()],
            biases: vec![0.0; l.biases.len()],
        };
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-7,
            t: 0,
            m: layers.iter().map(zeros).collect(),
            v: layers.iter().map(zeros).collect(),
        }
    }

    fn step(&mut self, layers: &mut [Dense], grads: &[DenseGrad]) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t.min(i32::MAX as u64) as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t.min(i32::MAX as u64) as i32);
        let step = self.lr * bc2.sqrt() / bc1;

        for (i, layer) in layers.iter_mut().enumerate() {
            let (m, v, g) = (&mut self.m[i], &mut self.v[i], &grads[i]);
            adam_update(
                &mut layer.weights,
                &mut m.weights,
                &mut v.weights,
                &g.weights,
                self.beta1,
                self.beta2,
                self.eps,
                step,
            );
            adam_update(
                &mut layer.biases,
                &mut m.biases,
                &mut v.biases,
                &g.biases,
                self.beta1,
                self.beta2,
                self.eps,
                step,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
#[inline]
fn adam_update(
    params: &mut [f32],
    m: &mut [f32],
    v: &mut [f32],
    g: &[f32],
    beta1: f32,
    beta2: f32,
    eps: f32,
    step: f32,
) {
    for j in 0..params.len() {
        m[j] = beta1 * m[j] + (1.0 - beta1) * g[j];
        v[j] = beta2 * v[j] + (1.0 - beta2) * g[j] * g[j];
        params[j] -= step * m[j] / (v[j].sqrt() + eps);
    }
}

/// One scalar value per button for a given grid.
#[derive(Debug, Clone)]
pub struct ValueNetwork {
    vision_size: usize,
    activation: Activation,
    layers: Vec<Dense>,
    optimizer: Adam,
}

impl ValueNetwork {
    /// Build a freshly initialised network for grids of side `2 * vision_size + 1`.
    pub fn build(vision_size: usize, cfg: &NetworkConfig, rng: &mut Prng) -> Self {
        let side = side_for_vision(vision_size);
        let mut layers = Vec::with_capacity(cfg.hidden_layers + 1);
        let mut width = side * side;
        for _ in 0..cfg.hidden_layers {
            layers.push(Dense::glorot(width, cfg.hidden_width, rng));
            width = cfg.hidden_width;
        }
        layers.push(Dense::glorot(width, BUTTON_COUNT, rng));

        Self::from_parts(vision_size, cfg.activation, layers, cfg.learning_rate)
    }

    pub(crate) fn from_parts(
        vision_size: usize,
        activation: Activation,
        layers: Vec<Dense>,
        learning_rate: f32,
    ) -> Self {
        let optimizer = Adam::new(learning_rate, &layers);
        Self {
            vision_size,
            activation,
            layers,
            optimizer,
        }
    }

    pub fn vision_size(&self) -> usize {
        self.vision_size
    }

    pub fn side(&self) -> usize {
        side_for_vision(self.vision_size)
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Dense::param_count).sum()
    }

    /// Number of optimizer steps applied so far.
    pub fn steps(&self) -> u64 {
        self.optimizer.t
    }

    pub(crate) fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.lr
    }

    pub fn set_learning_rate(&mut self, lr: f32) {
        self.optimizer.lr = lr;
    }

    fn check_grid(&self, grid: &Grid) -> Result<()> {
        if grid.side() != self.side() {
            return Err(Error::GridSizeMismatch {
                expected: self.side(),
                got: grid.side(),
            });
        }
        Ok(())
    }

    /// Forward pass; does not touch parameters.
    pub fn evaluate(&self, grid: &Grid) -> Result<Vec<f32>> {
        self.check_grid(grid)?;
        let mut x = grid.to_input();
        let mut next = Vec::new();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            layer.forward(&x, &mut next);
            if i != last {
                for v in next.iter_mut() {
                    *v = self.activation.apply(*v);
                }
            }
            std::mem::swap(&mut x, &mut next);
        }
        Ok(x)
    }

    fn forward_traced(&self, grid: &Grid) -> ForwardTrace {
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre = Vec::with_capacity(self.layers.len());
        let mut x = grid.to_input();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = Vec::with_capacity(layer.outputs);
            layer.forward(&x, &mut z);
            let a = if i != last {
                z.iter().map(|&v| self.activation.apply(v)).collect()
            } else {
                z.clone()
            };
            inputs.push(x);
            pre.push(z);
            x = a;
        }
        ForwardTrace {
            inputs,
            pre,
            output: x,
        }
    }

    fn backward(&self, trace: &ForwardTrace, d_output: &[f32]) -> Vec<DenseGrad> {
        let mut grads: Vec<DenseGrad> = Vec::with_capacity(self.layers.len());
        let mut delta = d_output.to_vec();

        for i in (0..self.layers.len()).rev() {
            let layer = &self.layers[i];
            let input = &trace.inputs[i];

            let mut gw = vec![0.0f32; layer.weights.len()];
            for (o, d) in delta.iter().enumerate() {
                let row = &mut gw[o * layer.inputs..(o + 1) * layer.inputs];
                for (g, xi) in row.iter_mut().zip(input) {
                    *g = d * xi;
                }
            }
            let gb = delta.clone();

            if i > 0 {
                // Propagate through weights and the previous layer's activation.
                let prev_pre = &trace.pre[i - 1];
                let mut prev_delta = vec![0.0f32; layer.inputs];
                for (o, d) in delta.iter().enumerate() {
                    let row = &layer.weights[o * layer.inputs..(o + 1) * layer.inputs];
                    for (pd, w) in prev_delta.iter_mut().zip(row) {
                        *pd += d * w;
                    }
                }
                for (j, pd) in prev_delta.iter_mut().enumerate() {
                    *pd *= self.activation.derivative(prev_pre[j], input[j]);
                }
                delta = prev_delta;
            }

            grads.push(DenseGrad {
                weights: gw,
                biases: gb,
            });
        }

        grads.reverse();
        grads
    }

    /// One optimizer step moving `evaluate(grid)` toward `target` under mean
    /// squared error. Returns the loss measured before the step.
    pub fn train_step(&mut self, grid: &Grid, target: &[f32]) -> Result<f32> {
        self.check_grid(grid)?;
        if target.len() != BUTTON_COUNT {
            return Err(Error::InvalidConfig {
                message: format!(
                    "target has {} entries, network has {BUTTON_COUNT} outputs",
                    target.len()
                ),
            });
        }

        let trace = self.forward_traced(grid);
        let n = BUTTON_COUNT as f32;
        let mut loss = 0.0f32;
        let d_output: Vec<f32> = trace
            .output
            .iter()
            .zip(target)
            .map(|(q, t)| {
                let diff = q - t;
                loss += diff * diff;
                2.0 * diff / n
            })
            .collect();
        loss /= n;

        let grads = self.backward(&trace, &d_output);
        self.optimizer.step(&mut self.layers, &grads);
        Ok(loss)
    }
}
