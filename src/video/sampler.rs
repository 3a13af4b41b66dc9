use crate::error::{DetectError, Result};

/// Frame indices to decode from a video, in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePlan {
    indices: Vec<usize>,
}

impl SamplePlan {
    /// Spread `k` indices linearly over `[0, total_frames - 1]`.
    ///
    /// Indices are rounded to the nearest frame, so duplicates appear when
    /// `k > total_frames`. The first index is always 0 and, for `k > 1`, the
    /// last is always `total_frames - 1`.
    pub fn compute(total_frames: usize, k: usize) -> Result<Self> {
        if total_frames == 0 {
            return Err(DetectError::EmptyVideo);
        }

        let last = total_frames - 1;
        let indices = match k {
            0 => Vec::new(),
            1 => vec![0],
            _ => {
                let span = (k - 1) as f64;
                (0..k)
                    .map(|i| ((i * last) as f64 / span).round() as usize)
                    .collect()
            }
        };

        Ok(Self { indices })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl<'a> IntoIterator for &'a SamplePlan {
    type Item = &'a usize;
    type IntoIter = std::slice::Iter<'a, usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.indices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_video_is_rejected() {
        assert!(matches!(SamplePlan::compute(0, 5), Err(DetectError::EmptyVideo)));
        assert!(matches!(SamplePlan::compute(0, 1), Err(DetectError::EmptyVideo)));
    }

    #[test]
    fn test_single_sample_is_first_frame() {
        let plan = SamplePlan::compute(300, 1).unwrap();
        assert_eq!(plan.indices(), &[0]);
    }

    #[test]
    fn test_endpoints_and_spacing() {
        let plan = SamplePlan::compute(100, 10).unwrap();
        assert_eq!(plan.indices(), &[0, 11, 22, 33, 44, 55, 66, 77, 88, 99]);
    }

    #[test]
    fn test_rounds_to_nearest_frame() {
        // 0, 1.5, 3 -> 0, 2, 3
        let plan = SamplePlan::compute(4, 3).unwrap();
        assert_eq!(plan.indices(), &[0, 2, 3]);
    }

    #[test]
    fn test_more_samples_than_frames_repeats_indices() {
        let plan = SamplePlan::compute(3, 7).unwrap();
        assert_eq!(plan.len(), 7);
        assert_eq!(plan.indices().first(), Some(&0));
        assert_eq!(plan.indices().last(), Some(&2));
    }

    #[test]
    fn test_plan_invariants_hold_across_sizes() {
        for total in 1..40 {
            for k in 1..25 {
                let plan = SamplePlan::compute(total, k).unwrap();
                let idx = plan.indices();
                assert_eq!(idx.len(), k);
                assert_eq!(idx[0], 0);
                assert!(idx.windows(2).all(|w| w[0] <= w[1]));
                assert!(idx.iter().all(|&i| i < total));
                if k > 1 {
                    assert_eq!(*idx.last().unwrap(), total - 1);
                }
            }
        }
    }
}
