//! Batch-level mixup augmentation
//!
//! Blends each image in a batch with a randomly chosen partner and splits the
//! loss and accuracy credit between both labels.

use rand::{RngCore, seq::SliceRandom};
use rand_distr::{Beta, Distribution};

use crate::datasets::Image;
use crate::loss::CrossEntropyLoss;
use crate::nn::argmax;
use crate::values::Value;

/// A batch blended with a permuted copy of itself
pub struct MixedBatch {
    pub images: Vec<Image>,
    pub targets_a: Vec<u8>,
    pub targets_b: Vec<u8>,
    pub lam: f32,
}

/// Blends each image with a randomly permuted partner,
/// `lam * x_i + (1 - lam) * x_perm(i)`. The coefficient is drawn from
/// Beta(alpha, alpha) when `alpha > 0`, otherwise fixed at 1.
pub fn mixup_batch(
    images: &[Image],
    labels: &[u8],
    alpha: f32,
    rng: &mut dyn RngCore,
) -> MixedBatch {
    let lam = if alpha > 0.0 {
        Beta::new(alpha, alpha).unwrap().sample(rng)
    } else {
        1.0
    };
    let mut perm = (0..images.len()).collect::<Vec<_>>();
    perm.shuffle(rng);

    let mixed = images
        .iter()
        .zip(perm.iter())
        .map(|(image, &j)| {
            let partner = &images[j];
            assert_eq!(
                (image.channels, image.height, image.width),
                (partner.channels, partner.height, partner.width)
            );
            let data = image
                .data
                .iter()
                .zip(partner.data.iter())
                .map(|(a, b)| lam * a + (1.0 - lam) * b)
                .collect();
            Image::new(image.channels, image.height, image.width, data)
        })
        .collect();
    let targets_b = perm.iter().map(|&j| labels[j]).collect();

    MixedBatch {
        images: mixed,
        targets_a: labels.to_vec(),
        targets_b,
        lam,
    }
}

/// The loss for a mixed batch is the convex combination of the cross entropy
/// against each label set: `lam * loss(a) + (1 - lam) * loss(b)`
pub fn mixup_loss(
    logits: &[Vec<Value>],
    targets_a: &[u8],
    targets_b: &[u8],
    lam: f32,
) -> Value {
    let loss_a = CrossEntropyLoss::batch(logits, targets_a);
    let loss_b = CrossEntropyLoss::batch(logits, targets_b);
    &(&Value::new(lam) * &loss_a) + &(&Value::new(1.0 - lam) * &loss_b)
}

/// Accuracy credit for a mixed batch, split `lam` / `1 - lam` between the two
/// label sets
pub fn mixup_correct(
    logits: &[Vec<Value>],
    targets_a: &[u8],
    targets_b: &[u8],
    lam: f32,
) -> f32 {
    let mut correct = 0.0;
    for ((sample, a), b) in logits.iter().zip(targets_a.iter()).zip(targets_b.iter()) {
        let predicted = argmax(sample);
        if predicted == *a as usize {
            correct += lam;
        }
        if predicted == *b as usize {
            correct += 1.0 - lam;
        }
    }
    correct
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_lam_within_unit_interval() {
        let images = vec![Image::filled(1, 2, 2, 0.0), Image::filled(1, 2, 2, 1.0)];
        let labels = vec![0, 1];
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        for _ in 0..32 {
            let mixed = mixup_batch(&images, &labels, 0.1, &mut rng);
            assert!(mixed.lam >= 0.0 && mixed.lam <= 1.0);
        }
    }

    #[test]
    fn test_zero_alpha_disables_blending() {
        let images = vec![Image::filled(1, 2, 2, 0.25), Image::filled(1, 2, 2, 0.75)];
        let labels = vec![4, 7];
        let mixed = mixup_batch(&images, &labels, 0.0, &mut Pcg64Mcg::seed_from_u64(9));
        assert_eq_float!(mixed.lam, 1.0);
        // with lam = 1 every image keeps its own pixels and label
        assert_eq!(mixed.images[0], images[0]);
        assert_eq!(mixed.images[1], images[1]);
        assert_eq!(mixed.targets_a, labels);
    }

    #[test]
    fn test_blend_is_convex_combination() {
        // constant-valued images let the permutation be recovered from targets_b
        let values = [0.0f32, 1.0];
        let images = vec![Image::filled(1, 2, 2, values[0]), Image::filled(1, 2, 2, values[1])];
        let labels = vec![0, 1];
        let mixed = mixup_batch(&images, &labels, 0.1, &mut Pcg64Mcg::seed_from_u64(11));
        for (i, image) in mixed.images.iter().enumerate() {
            let partner = mixed.targets_b[i] as usize;
            let expected = mixed.lam * values[i] + (1.0 - mixed.lam) * values[partner];
            for v in &image.data {
                assert_eq_float!(*v, expected);
            }
        }
    }

    #[test]
    fn test_mixup_loss_is_convex_combination() {
        let logits = vec![vec![Value::new(0.3), Value::new(-0.2), Value::new(1.1)]];
        let targets_a = [0u8];
        let targets_b = [2u8];
        let lam = 0.7;
        let loss = mixup_loss(&logits, &targets_a, &targets_b, lam);
        let loss_a = CrossEntropyLoss::batch(&logits, &targets_a);
        let loss_b = CrossEntropyLoss::batch(&logits, &targets_b);
        assert_eq_float!(loss.data(), lam * loss_a.data() + (1.0 - lam) * loss_b.data());
    }

    #[test]
    fn test_mixup_correct_splits_credit() {
        // prediction is class 1
        let logits = vec![vec![Value::new(0.0), Value::new(2.0), Value::new(0.0)]];
        let lam = 0.6;
        assert_eq_float!(mixup_correct(&logits, &[1], &[2], lam), 0.6);
        assert_eq_float!(mixup_correct(&logits, &[0], &[1], lam), 0.4);
        assert_eq_float!(mixup_correct(&logits, &[1], &[1], lam), 1.0);
        assert_eq_float!(mixup_correct(&logits, &[0], &[2], lam), 0.0);
    }
}
