//! Components to build a convolutional neural network

use std::sync::atomic::{self, AtomicUsize};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::datasets::Image;
use crate::values::Value;

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("Input size mismatch")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("Input has {got} channels, layer expects {expected}")]
    ChannelMismatch { expected: usize, got: usize },
    #[error("Feature map shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        got: (usize, usize, usize),
    },
    #[error("Kernel of size {kernel} does not fit a {height}x{width} input with padding {padding}")]
    KernelTooLarge {
        kernel: usize,
        height: usize,
        width: usize,
        padding: usize,
    },
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn zero_grad(&mut self) {
        for p in self.parameters().iter_mut() {
            p.zero_grad();
        }
    }

    fn parameters(&self) -> Vec<Value>;
}

/// A channels-height-width stack of graph values, row major within each channel.
/// Cloning is shallow: the clone shares the underlying graph nodes.
#[derive(Clone, Debug)]
pub struct FeatureMap {
    channels: usize,
    height: usize,
    width: usize,
    values: Vec<Value>,
}

impl FeatureMap {
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        values: Vec<Value>,
    ) -> Result<Self, NNError> {
        if values.len() != channels * height * width {
            return Err(NNError::InputSizeMismatch {
                expected: channels * height * width,
                got: values.len(),
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            values,
        })
    }

    /// Lifts an image into leaf nodes of the computation graph
    pub fn from_image(image: &Image) -> Self {
        Self {
            channels: image.channels,
            height: image.height,
            width: image.width,
            values: image.data.iter().map(|v| Value::new(*v)).collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, channel: usize, y: usize, x: usize) -> &Value {
        &self.values[(channel * self.height + y) * self.width + x]
    }

    /// Same spatial shape, new values (e.g. after an elementwise activation)
    pub fn with_values(&self, values: Vec<Value>) -> Result<Self, NNError> {
        Self::new(self.channels, self.height, self.width, values)
    }

    /// Elementwise sum of two feature maps, used for residual connections
    pub fn add(&self, other: &FeatureMap) -> Result<FeatureMap, NNError> {
        if self.shape() != other.shape() {
            return Err(NNError::ShapeMismatch {
                expected: self.shape(),
                got: other.shape(),
            });
        }
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a + b)
            .collect();
        self.with_values(values)
    }
}

/// A single neuron in a dense layer
pub struct Neuron {
    /// weights of the neuron
    pub weights: Vec<Value>,
    /// bias of the neuron
    pub bias: Value,
}

impl Neuron {
    fn new(n_inputs: usize) -> Self {
        // He initialization to ensure the variance of the output is the same as the input
        // and keep weights relatively small to avoid exploding or vanishing gradients
        let std = (2.0 / n_inputs as f32).sqrt();
        let normal = Normal::new(0.0, std).unwrap();
        let weights = (0..n_inputs)
            .map(|_| Value::new(normal.sample(&mut rand::rng())))
            .collect();
        Self {
            weights,
            bias: Value::new(normal.sample(&mut rand::rng())),
        }
    }

    // Testing utility for a deterministic and simple neuron
    #[cfg(test)]
    fn new_ones(n_inputs: usize) -> Self {
        Self {
            weights: (0..n_inputs).map(|_| Value::new(1.0)).collect(),
            bias: Value::new(1.0),
        }
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.weights
            .iter()
            .chain(std::iter::once(&self.bias))
            .cloned()
            .collect()
    }

    pub fn forward(&self, inputs: &[Value]) -> Result<Value, NNError> {
        if inputs.len() != self.weights.len() {
            return Err(NNError::InputSizeMismatch {
                expected: self.weights.len(),
                got: inputs.len(),
            });
        }
        let output = self
            .weights
            .iter()
            .zip(inputs.iter())
            .map(|(w, i)| w * i)
            .sum::<Value>();
        let output = &output + &self.bias;
        Ok(output)
    }
}

/// A fully connected layer
pub struct Linear {
    neurons: Vec<Neuron>,
}

impl Linear {
    /// Creates a new layer with the given number of inputs and outputs
    pub fn new(n_inputs: usize, n_outputs: usize) -> Self {
        let neurons = (0..n_outputs).map(|_| Neuron::new(n_inputs)).collect();
        Self { neurons }
    }

    #[cfg(test)]
    fn new_ones(n_inputs: usize, n_outputs: usize) -> Self {
        let neurons = (0..n_outputs).map(|_| Neuron::new_ones(n_inputs)).collect();
        Self { neurons }
    }

    /// Returns all the parameters in the layer
    pub fn parameters(&self) -> Vec<Value> {
        self.neurons.iter().flat_map(|n| n.parameters()).collect()
    }

    /// Computes forward pass for a layer
    pub fn forward(&self, inputs: &[Value]) -> Result<Vec<Value>, NNError> {
        self.neurons
            .iter()
            .map(|n| n.forward(inputs))
            .collect::<Result<Vec<_>, _>>()
    }
}

/// A 2D convolution over a feature map, with square kernels and zero padding
pub struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    /// Kernel weights, indexed `[out_channel][in_channel][ky][kx]`, flattened
    weights: Vec<Value>,
    /// One bias per output channel
    biases: Vec<Value>,
}

impl Conv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        let std = (2.0 / fan_in as f32).sqrt();
        let normal = Normal::new(0.0, std).unwrap();
        let weights = (0..out_channels * fan_in)
            .map(|_| Value::new(normal.sample(&mut rand::rng())))
            .collect();
        let biases = (0..out_channels)
            .map(|_| Value::new(normal.sample(&mut rand::rng())))
            .collect();
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            weights,
            biases,
        }
    }

    // Deterministic kernels for shape and value tests: all weights set to
    // `weight`, biases set to zero
    #[cfg(test)]
    fn with_constant_weights(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        weight: f32,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        Self {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            weights: (0..out_channels * fan_in).map(|_| Value::new(weight)).collect(),
            biases: (0..out_channels).map(|_| Value::new(0.0)).collect(),
        }
    }

    pub fn parameters(&self) -> Vec<Value> {
        self.weights
            .iter()
            .chain(self.biases.iter())
            .cloned()
            .collect()
    }

    fn weight(&self, oc: usize, ic: usize, ky: usize, kx: usize) -> &Value {
        let k = self.kernel_size;
        &self.weights[((oc * self.in_channels + ic) * k + ky) * k + kx]
    }

    /// Computes the convolution. Contributions from zero-padded positions are
    /// skipped rather than materialized as graph nodes.
    pub fn forward(&self, input: &FeatureMap) -> Result<FeatureMap, NNError> {
        if input.channels() != self.in_channels {
            return Err(NNError::ChannelMismatch {
                expected: self.in_channels,
                got: input.channels(),
            });
        }
        let (h, w) = (input.height(), input.width());
        let k = self.kernel_size;
        let padded_h = h + 2 * self.padding;
        let padded_w = w + 2 * self.padding;
        if padded_h < k || padded_w < k {
            return Err(NNError::KernelTooLarge {
                kernel: k,
                height: h,
                width: w,
                padding: self.padding,
            });
        }
        let out_h = (padded_h - k) / self.stride + 1;
        let out_w = (padded_w - k) / self.stride + 1;

        let mut values = Vec::with_capacity(self.out_channels * out_h * out_w);
        for oc in 0..self.out_channels {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = self.biases[oc].clone();
                    for ic in 0..self.in_channels {
                        for ky in 0..k {
                            // coordinates in the padded frame, shifted back into the input
                            let Some(y) = (oy * self.stride + ky).checked_sub(self.padding)
                            else {
                                continue;
                            };
                            if y >= h {
                                continue;
                            }
                            for kx in 0..k {
                                let Some(x) = (ox * self.stride + kx).checked_sub(self.padding)
                                else {
                                    continue;
                                };
                                if x >= w {
                                    continue;
                                }
                                acc = &acc + &(self.weight(oc, ic, ky, kx) * input.get(ic, y, x));
                            }
                        }
                    }
                    values.push(acc);
                }
            }
        }
        FeatureMap::new(self.out_channels, out_h, out_w, values)
    }
}

/// Applies ReLU to a set of values, works for arbitrary number of inputs
#[derive(Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self {
            n_dead_neurons: AtomicUsize::new(0),
        }
    }

    /// Takes the element-wise ReLU of the input values
    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let n_dead_neurons = inputs.iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        inputs.iter().map(|v| v.relu()).collect()
    }

    /// Returns the number of dead neurons in the layer (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

/// Applies softmax to a set of values
#[derive(Default)]
pub struct Softmax {}

impl Softmax {
    pub fn new() -> Self {
        Self {}
    }

    pub fn forward(&self, inputs: &[Value]) -> Vec<Value> {
        let exp_sum = inputs.iter().map(|v| v.exp()).sum::<Value>();
        // Note: Large inputs can overflow the exponential function, leading to dividing
        // by `inf`, so callers should shift the inputs into a stable range first
        inputs.iter().map(|v| v.exp() / exp_sum.clone()).collect()
    }
}

/// Averages each channel of a feature map down to a single value
pub fn global_avg_pool(input: &FeatureMap) -> Vec<Value> {
    let n = (input.height() * input.width()) as f32;
    (0..input.channels())
        .map(|c| {
            let start = c * input.height() * input.width();
            let sum = input.values()[start..start + input.height() * input.width()]
                .iter()
                .cloned()
                .sum::<Value>();
            sum / Value::new(n)
        })
        .collect()
}

/// Index of the largest value, e.g. the predicted class of a score vector
pub fn argmax(values: &[Value]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.data()
                .partial_cmp(&b.data())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Fan-aware uniform initialization for dense and convolutional weights,
/// `U(-limit, limit)` with `limit = sqrt(6 / (fan_in + fan_out))`.
///
/// The experiment driver does not call this; layers keep the initialization
/// from their constructors unless a caller re-initializes explicitly.
pub fn xavier_uniform(params: &mut [Value], fan_in: usize, fan_out: usize) {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let mut rng = rand::rng();
    for p in params.iter_mut() {
        p.set_data(rng.random_range(-limit..limit));
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;

    use super::*;

    fn feature_map(channels: usize, height: usize, width: usize, data: &[f32]) -> FeatureMap {
        FeatureMap::new(
            channels,
            height,
            width,
            data.iter().map(|v| Value::new(*v)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_linear_forward() {
        let layer = Linear::new_ones(2, 3);
        let inputs = vec![Value::new(1.0), Value::new(2.0)];
        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].data(), 4.0);
        assert_eq!(outputs[1].data(), 4.0);
        assert_eq!(outputs[2].data(), 4.0);
    }

    #[test]
    fn test_dim_mismatch() {
        let layer = Linear::new_ones(2, 3);
        let inputs = vec![Value::new(1.0)];
        let outputs = layer.forward(&inputs).unwrap_err();
        assert!(matches!(
            outputs,
            NNError::InputSizeMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_conv_known_values() {
        let conv = Conv2d::with_constant_weights(1, 1, 2, 1, 0, 1.0);
        let input = feature_map(1, 3, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.shape(), (1, 2, 2));
        assert_eq_float!(out.get(0, 0, 0).data(), 12.0);
        assert_eq_float!(out.get(0, 0, 1).data(), 16.0);
        assert_eq_float!(out.get(0, 1, 0).data(), 24.0);
        assert_eq_float!(out.get(0, 1, 1).data(), 28.0);
    }

    #[test]
    fn test_conv_padding() {
        let conv = Conv2d::with_constant_weights(1, 1, 3, 1, 1, 1.0);
        let input = feature_map(1, 2, 2, &[1.0; 4]);
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.shape(), (1, 2, 2));
        // every 3x3 window covers exactly the four in-bounds ones
        for y in 0..2 {
            for x in 0..2 {
                assert_eq_float!(out.get(0, y, x).data(), 4.0);
            }
        }
    }

    #[test]
    fn test_conv_stride() {
        let conv = Conv2d::with_constant_weights(1, 2, 2, 2, 0, 1.0);
        let input = feature_map(1, 4, 4, &[1.0; 16]);
        let out = conv.forward(&input).unwrap();
        assert_eq!(out.shape(), (2, 2, 2));
        assert_eq_float!(out.get(1, 1, 1).data(), 4.0);
    }

    #[test]
    fn test_conv_gradients() {
        let conv = Conv2d::with_constant_weights(1, 1, 1, 1, 0, 3.0);
        let input = feature_map(1, 1, 1, &[2.0]);
        let out = conv.forward(&input).unwrap();
        assert_eq_float!(out.get(0, 0, 0).data(), 6.0);

        out.get(0, 0, 0).backward();
        // d out / d w = x, d out / d b = 1
        let params = conv.parameters();
        assert_eq_float!(params[0].grad(), 2.0);
        assert_eq_float!(params[1].grad(), 1.0);
    }

    #[test]
    fn test_conv_channel_mismatch() {
        let conv = Conv2d::with_constant_weights(3, 1, 3, 1, 1, 1.0);
        let input = feature_map(1, 4, 4, &[1.0; 16]);
        assert!(matches!(
            conv.forward(&input).unwrap_err(),
            NNError::ChannelMismatch {
                expected: 3,
                got: 1
            }
        ));
    }

    #[test]
    fn test_feature_map_add() {
        let a = feature_map(1, 1, 2, &[1.0, 2.0]);
        let b = feature_map(1, 1, 2, &[3.0, 4.0]);
        let c = a.add(&b).unwrap();
        assert_eq_float!(c.get(0, 0, 0).data(), 4.0);
        assert_eq_float!(c.get(0, 0, 1).data(), 6.0);

        let d = feature_map(2, 1, 1, &[1.0, 2.0]);
        assert!(matches!(a.add(&d), Err(NNError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_global_avg_pool() {
        let input = feature_map(2, 2, 2, &[1.0, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 10.0]);
        let pooled = global_avg_pool(&input);
        assert_eq!(pooled.len(), 2);
        assert_eq_float!(pooled[0].data(), 2.5);
        assert_eq_float!(pooled[1].data(), 10.0);
    }

    #[test]
    fn test_softmax() {
        let softmax = Softmax::new();
        let inputs = vec![Value::new(1.0), Value::new(2.0)];
        let mut outputs = softmax.forward(&inputs);
        assert_eq!(outputs.len(), 2);
        assert_eq_float!(outputs[0].data(), 0.2689414);
        assert_eq_float!(outputs[1].data(), 0.7310585);

        // Softmax(x1, x2) = (exp(x1) / (exp(x1) + exp(x2)), exp(x2) / (exp(x1) + exp(x2)))
        // Let s1 = exp(x1) / (exp(x1) + exp(x2)) and s2 = exp(x2) / (exp(x1) + exp(x2))
        // d s1 / dx1 = s1 * (1 - s1)
        // d s1 / dx2 = -s1 * s2
        outputs[0].backward();
        let s1 = outputs[0].data();
        let s2 = outputs[1].data();
        assert_eq_float!(inputs[0].grad(), s1 * (1.0 - s1));
        assert_eq_float!(inputs[1].grad(), -s1 * s2);

        // Note that `inputs[i].zero_grad()` (zeroing leaf nodes) is insufficient because there are many intermediate nodes
        // created to compute the output that will not be zeroed out! Printing `outputs[0]` will show these intermediate nodes.
        outputs[0].zero_grad();
        // d s2 / dx1 = -s1 * s2
        // d s2 / dx2 = s2 * (1 - s2)
        outputs[1].backward();
        assert_eq_float!(inputs[0].grad(), -s1 * s2);
        assert_eq_float!(inputs[1].grad(), s2 * (1.0 - s2));
    }

    #[test]
    fn test_argmax() {
        let values = vec![Value::new(0.1), Value::new(2.5), Value::new(-1.0)];
        assert_eq!(argmax(&values), 1);
    }

    #[test]
    fn test_xavier_uniform_bounds() {
        let mut params = (0..64).map(|_| Value::new(100.0)).collect::<Vec<_>>();
        xavier_uniform(&mut params, 8, 4);
        let limit = (6.0f32 / 12.0).sqrt();
        for p in &params {
            assert!(p.data() > -limit && p.data() < limit);
        }
    }
}
