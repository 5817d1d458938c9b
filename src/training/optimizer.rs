//! Adam optimizer and step learning-rate schedule.

use rayon::prelude::*;

/// Adam with PyTorch's update rule:
///
/// ```text
/// m = b1*m + (1-b1)*g
/// v = b2*v + (1-b2)*g^2
/// p -= lr/(1-b1^t) * m / (sqrt(v)/sqrt(1-b2^t) + eps)
/// ```
#[derive(Debug, Clone)]
pub struct Adam {
    /// Current learning rate, set by the schedule each epoch.
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// Update steps taken.
    pub steps: u64,
    /// First moment per tensor.
    m: Vec<Vec<f32>>,
    /// Second moment per tensor.
    v: Vec<Vec<f32>>,
}

impl Adam {
    /// Optimizer for tensors of the given sizes, in the order they will be
    /// passed to [`Adam::step`].
    pub fn new(lr: f64, tensor_sizes: &[usize]) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            steps: 0,
            m: tensor_sizes.iter().map(|&n| vec![0.0; n]).collect(),
            v: tensor_sizes.iter().map(|&n| vec![0.0; n]).collect(),
        }
    }

    /// Apply one update. `params[i]` and `grads[i]` must have the size given
    /// for tensor `i` at construction.
    pub fn step(&mut self, params: &mut [&mut [f32]], grads: &[Vec<f32>]) {
        debug_assert_eq!(params.len(), self.m.len());
        debug_assert_eq!(grads.len(), self.m.len());

        self.steps += 1;
        let t = self.steps as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        let step_size = (self.lr / bias1) as f32;
        let bias2_sqrt = bias2.sqrt() as f32;
        let (b1, b2, eps) = (self.beta1 as f32, self.beta2 as f32, self.eps as f32);

        for (((p, g), m), v) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            p.par_iter_mut()
                .zip(g.par_iter())
                .zip(m.par_iter_mut())
                .zip(v.par_iter_mut())
                .for_each(|(((p, &g), m), v)| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= step_size * *m / (v.sqrt() / bias2_sqrt + eps);
                });
        }
    }
}

/// Step decay: `lr = base_lr * gamma^(epoch / step_epochs)`.
#[derive(Debug, Clone, Copy)]
pub struct StepLr {
    pub base_lr: f64,
    pub step_epochs: usize,
    pub gamma: f64,
}

impl StepLr {
    /// Learning rate for the 0-based `epoch`.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = epoch / self.step_epochs.max(1);
        self.base_lr * self.gamma.powi(decays as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_lr() {
        // After one step m̂ = g and v̂ = g², so each param moves by ~lr * sign(g).
        let mut adam = Adam::new(0.01, &[3]);
        let mut p = vec![1.0_f32, 1.0, 1.0];
        let grads = vec![vec![0.5_f32, -2.0, 0.0]];
        adam.step(&mut [p.as_mut_slice()], &grads);

        assert!((p[0] - 0.99).abs() < 1e-6);
        assert!((p[1] - 1.01).abs() < 1e-6);
        assert_eq!(p[2], 1.0);
        assert_eq!(adam.steps, 1);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut adam = Adam::new(0.1, &[2]);
        let mut p = vec![3.0_f32, -4.0];
        for _ in 0..500 {
            let g = vec![p.iter().map(|x| 2.0 * x).collect::<Vec<f32>>()];
            adam.step(&mut [p.as_mut_slice()], &g);
        }
        assert!(p.iter().all(|x| x.abs() < 0.05), "{p:?}");
    }

    #[test]
    fn test_step_lr_schedule() {
        let sched = StepLr { base_lr: 0.0005, step_epochs: 15, gamma: 0.5 };
        assert_eq!(sched.lr_at(0), 0.0005);
        assert_eq!(sched.lr_at(14), 0.0005);
        assert_eq!(sched.lr_at(15), 0.00025);
        assert_eq!(sched.lr_at(31), 0.000125);
    }
}
