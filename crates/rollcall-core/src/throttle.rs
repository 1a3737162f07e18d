use crate::types::InvalidInput;

/// Default analysis stride: every second frame.
pub const DEFAULT_STRIDE: u32 = 2;

/// Decides which frames are forwarded to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameThrottle {
    stride: u32,
}

impl FrameThrottle {
    pub fn new(stride: u32) -> Result<Self, InvalidInput> {
        if stride == 0 {
            return Err(InvalidInput("frame stride must be at least 1".into()));
        }
        Ok(Self { stride })
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Analyze iff `frame_index mod stride == 0`.
    pub fn should_analyze(&self, frame_index: u64) -> bool {
        frame_index % u64::from(self.stride) == 0
    }
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stride_analyzes_even_frames() {
        let throttle = FrameThrottle::default();
        let analyzed: Vec<u64> = (1..=6).filter(|&i| throttle.should_analyze(i)).collect();
        assert_eq!(analyzed, vec![2, 4, 6]);
    }

    #[test]
    fn test_stride_one_analyzes_everything() {
        let throttle = FrameThrottle::new(1).unwrap();
        assert!((1..100).all(|i| throttle.should_analyze(i)));
    }

    #[test]
    fn test_zero_stride_rejected() {
        assert!(FrameThrottle::new(0).is_err());
    }
}
