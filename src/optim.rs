//! Optimizer(s) and learning rate schedules

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
    /// Current learning rate
    fn lr(&self) -> f32;
    /// Replaces the learning rate, used by schedulers
    fn set_lr(&mut self, lr: f32);
}

/// SGD with momentum, optional Nesterov acceleration, and L2 weight decay,
/// following the torch.optim.SGD update rule
pub struct SGD {
    params: Vec<Value>,
    lr: f32,
    momentum: f32,
    nesterov: bool,
    weight_decay: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    pub fn new(
        params: Vec<Value>,
        lr: f32,
        momentum: f32,
        nesterov: bool,
        weight_decay: f32,
    ) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            nesterov,
            weight_decay,
            velocity,
        }
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (idx, param) in self.params.iter_mut().enumerate() {
            // weight decay folds into the gradient before the momentum update
            let mut update = param.grad() + self.weight_decay * param.data();
            if self.momentum != 0.0 {
                let velocity = self.momentum * self.velocity[idx] + update;
                self.velocity[idx] = velocity;
                update = if self.nesterov {
                    update + self.momentum * velocity
                } else {
                    velocity
                };
            }
            let new_val = param.data() - self.lr * update;
            param.set_data(new_val);
        }
    }

    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.zero_grad();
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Multiplies the learning rate by `gamma` each time the epoch counter reaches
/// a milestone. Stepped once after every epoch.
pub struct MultiStepLR {
    milestones: Vec<usize>,
    gamma: f32,
    epoch: usize,
}

impl MultiStepLR {
    pub fn new(milestones: Vec<usize>, gamma: f32) -> Self {
        Self {
            milestones,
            gamma,
            epoch: 0,
        }
    }

    /// Advances one epoch, adjusting the optimizer in place
    pub fn step(&mut self, optim: &mut dyn Optim) {
        self.epoch += 1;
        if self.milestones.contains(&self.epoch) {
            let lr = optim.lr() * self.gamma;
            optim.set_lr(lr);
            log::info!("epoch {}: learning rate set to {}", self.epoch, lr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_sgd_no_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.0, false, 0.0);
        optim.step();
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
        assert_eq!(c.grad(), 1.0);
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.9, false, 0.0);
        optim.step();
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
        assert_eq!(optim.velocities(), &[1.0, 1.0, 1.0]);
        optim.step();
        // v = 0.9 * 1 + 1 = 1.9, data -= 0.1 * 1.9
        assert_eq_float!(a.data(), 0.71);
        assert_eq_float!(b.data(), 1.71);
        assert_eq_float!(c.data(), 2.71);
        assert_eq!(optim.velocities(), &[1.9, 1.9, 1.9]);
    }

    #[test]
    fn test_sgd_nesterov() {
        let a = Value::new(1.0);
        let b = &a + &Value::new(0.0);
        b.backward();

        let mut optim = SGD::new(vec![a.clone()], 0.1, 0.9, true, 0.0);
        optim.step();
        // v = 1, update = grad + 0.9 * v = 1.9
        assert_eq_float!(a.data(), 0.81);
        optim.step();
        // v = 0.9 * 1 + 1 = 1.9, update = 1 + 0.9 * 1.9 = 2.71
        assert_eq_float!(a.data(), 0.81 - 0.271);
    }

    #[test]
    fn test_sgd_weight_decay() {
        let a = Value::new(1.0);
        let b = &a + &Value::new(0.0);
        b.backward();

        let mut optim = SGD::new(vec![a.clone()], 0.1, 0.0, false, 0.5);
        optim.step();
        // update = grad + 0.5 * data = 1.5
        assert_eq_float!(a.data(), 0.85);
    }

    #[test]
    fn test_multi_step_lr() {
        let mut optim = SGD::new(vec![], 1.0, 0.0, false, 0.0);
        let mut scheduler = MultiStepLR::new(vec![2, 4], 0.5);

        scheduler.step(&mut optim);
        assert_eq_float!(optim.lr(), 1.0);
        scheduler.step(&mut optim);
        assert_eq_float!(optim.lr(), 0.5);
        scheduler.step(&mut optim);
        assert_eq_float!(optim.lr(), 0.5);
        scheduler.step(&mut optim);
        assert_eq_float!(optim.lr(), 0.25);
        scheduler.step(&mut optim);
        assert_eq_float!(optim.lr(), 0.25);
    }
}
