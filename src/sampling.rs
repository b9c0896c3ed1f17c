use candle_core::{DType, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::{InferenceError, Result};

pub struct Sampler {
    temperature: f64,
    top_p: f64,
    top_k: usize,
    rng: StdRng,
}

impl Sampler {
    pub fn new(temperature: f64, top_p: f64, top_k: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            temperature,
            top_p,
            top_k,
            rng,
        }
    }

    pub fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        let logits = get_last_logits(logits)?.to_dtype(DType::F32)?;
        let logits: Vec<f32> = logits.to_vec1()?;

        if self.temperature <= 0.0 {
            return argmax(&logits)
                .map(|idx| idx as u32)
                .ok_or_else(|| InferenceError::Inference("empty logits".to_string()));
        }

        let temperature = self.temperature as f32;
        let mut indexed: Vec<(usize, f32)> = logits
            .iter()
            .map(|l| l / temperature)
            .enumerate()
            .collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

        if self.top_k > 0 && self.top_k < indexed.len() {
            indexed.truncate(self.top_k);
        }

        let scores: Vec<f32> = indexed.iter().map(|(_, l)| *l).collect();
        let mut probs = softmax(&scores);

        if self.top_p < 1.0 {
            let mut cumsum = 0.0f32;
            let cutoff = probs
                .iter()
                .position(|p| {
                    cumsum += p;
                    cumsum > self.top_p as f32
                })
                .map(|idx| idx + 1)
                .unwrap_or(probs.len());
            probs.truncate(cutoff.max(1));
            let sum: f32 = probs.iter().sum();
            probs.iter_mut().for_each(|p| *p /= sum);
        }

        let r: f32 = self.rng.gen();
        let mut cumsum = 0.0;
        for (pos, prob) in probs.iter().enumerate() {
            cumsum += prob;
            if r < cumsum {
                return Ok(indexed[pos].0 as u32);
            }
        }

        Ok(indexed[probs.len().saturating_sub(1)].0 as u32)
    }
}

/// Numerically stable normalized exponential over a score vector.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((idx, v)),
        })
        .map(|(idx, _)| idx)
}

/// Reduce a `(vocab)`, `(seq, vocab)` or `(batch, seq, vocab)` tensor to the
/// logits of the final position.
pub fn get_last_logits(logits: &Tensor) -> Result<Tensor> {
    let dims = logits.dims();
    match dims.len() {
        1 => Ok(logits.clone()),
        2 => Ok(logits.get(dims[0] - 1)?),
        3 => Ok(logits.get(0)?.get(dims[1] - 1)?),
        n => Err(InferenceError::Inference(format!(
            "unexpected logits rank {}",
            n
        ))),
    }
}

pub fn apply_repeat_penalty(
    logits: &Tensor,
    repeat_penalty: f32,
    context: &[u32],
) -> Result<Tensor> {
    if repeat_penalty == 1.0 || context.is_empty() {
        return Ok(logits.clone());
    }

    let last_logits = get_last_logits(logits)?;
    let mut scores: Vec<f32> = last_logits.to_dtype(DType::F32)?.to_vec1()?;

    for &token_id in context {
        if let Some(score) = scores.get_mut(token_id as usize) {
            *score = if *score > 0.0 {
                *score / repeat_penalty
            } else {
                *score * repeat_penalty
            };
        }
    }

    let vocab_size = scores.len();
    Ok(Tensor::from_vec(scores, (vocab_size,), logits.device())?)
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    #[test]
    fn softmax_is_a_distribution() {
        let probs = softmax(&[2.0, 1.0, 0.1, -3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert_eq!(argmax(&probs), Some(0));
    }

    #[test]
    fn softmax_survives_large_scores() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn argmax_prefers_first_tie() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn zero_temperature_is_greedy() {
        let logits = Tensor::new(&[[[0.1f32, 3.0, 0.5]]], &Device::Cpu).unwrap();
        let mut sampler = Sampler::new(0.0, 0.9, 40, Some(7));
        for _ in 0..5 {
            assert_eq!(sampler.sample(&logits).unwrap(), 1);
        }
    }

    #[test]
    fn top_k_one_is_greedy() {
        let logits = Tensor::new(&[0.1f32, 0.2, 4.0, 0.3], &Device::Cpu).unwrap();
        let mut sampler = Sampler::new(0.8, 1.0, 1, Some(1));
        assert_eq!(sampler.sample(&logits).unwrap(), 2);
    }

    #[test]
    fn repeat_penalty_dampens_seen_tokens() {
        let logits = Tensor::new(&[[2.0f32, -1.0, 2.0]], &Device::Cpu).unwrap();
        let penalized = apply_repeat_penalty(&logits, 2.0, &[0, 1, 99]).unwrap();
        let values: Vec<f32> = penalized.to_vec1().unwrap();
        assert_eq!(values, vec![1.0, -2.0, 2.0]);
    }
}
