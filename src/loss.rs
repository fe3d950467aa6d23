//! Loss function(s)

use crate::nn::Softmax;
use crate::values::Value;

/// Cross entropy between unnormalized class scores and an integer target
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Loss for a single sample: `-ln(softmax(logits)[target])`.
    ///
    /// Logits are shifted by their maximum before the softmax so the
    /// exponentials stay in a stable range; the shift is a leaf constant and
    /// does not change the gradients reaching the logits.
    pub fn call(logits: &[Value], target: usize) -> Value {
        let max = logits
            .iter()
            .map(|v| v.data())
            .fold(f32::NEG_INFINITY, f32::max);
        let max = Value::new(max);
        let shifted = logits.iter().map(|v| v - &max).collect::<Vec<_>>();
        let probs = Softmax::new().forward(&shifted);
        -&probs[target].ln()
    }

    /// Mean loss over a batch of samples
    pub fn batch(logits: &[Vec<Value>], targets: &[u8]) -> Value {
        let total = logits
            .iter()
            .zip(targets.iter())
            .map(|(l, t)| Self::call(l, *t as usize))
            .sum::<Value>();
        total / Value::new(logits.len() as f32)
    }
}
