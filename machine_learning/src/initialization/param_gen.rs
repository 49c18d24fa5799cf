/// Produces the initial values of one parameter tensor.
pub trait ParamGen {
    /// Writes the next values into `dst`.
    ///
    /// # Arguments
    /// * `dst` - The slice to fill, usually a tensor's slot.
    ///
    /// # Returns
    /// How many leading elements of `dst` were written, less than `dst.len()`
    /// once the generator runs out.
    fn fill(&mut self, dst: &mut [f32]) -> usize;
}
