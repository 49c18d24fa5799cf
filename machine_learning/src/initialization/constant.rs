use super::ParamGen;

/// Fills with one value, e.g. zero biases or unit norm scales.
pub struct ConstParamGen {
    value: f32,
    remaining: usize,
}

impl ConstParamGen {
    /// # Arguments
    /// * `value` - The value to write.
    /// * `limit` - How many values to write in total.
    pub fn new(value: f32, limit: usize) -> Self {
        Self {
            value,
            remaining: limit,
        }
    }
}

impl ParamGen for ConstParamGen {
    fn fill(&mut self, dst: &mut [f32]) -> usize {
        let n = dst.len().min(self.remaining);
        dst[..n].fill(self.value);
        self.remaining -= n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_the_limit() {
        let mut ones = ConstParamGen::new(1.0, 5);
        let mut buf = [0.0; 3];

        assert_eq!(ones.fill(&mut buf), 3);
        assert_eq!(buf, [1.0; 3]);

        buf = [0.0; 3];
        assert_eq!(ones.fill(&mut buf), 2);
        assert_eq!(buf, [1.0, 1.0, 0.0]);
        assert_eq!(ones.fill(&mut buf), 0);
    }
}
