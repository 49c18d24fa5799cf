use crate::error::Result;

/// Collective operations over the process group.
///
/// Every rank must issue the same calls in the same order with buffers of the
/// same length.
#[async_trait::async_trait]
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Replaces `buf` on every rank with the element-wise mean across ranks.
    ///
    /// # Arguments
    /// * `buf` - This rank's contribution, overwritten with the mean.
    ///
    /// # Errors
    /// `PayloadLengthMismatch` if a peer sent a different length, or the
    /// underlying I/O error.
    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()>;

    /// Overwrites `buf` on every rank with rank 0's contents.
    async fn broadcast(&mut self, buf: &mut [f32]) -> Result<()>;

    /// Says goodbye to the peers.
    async fn finish(&mut self) -> Result<()>;

    /// The mean of one scalar across ranks.
    async fn mean_scalar(&mut self, value: f32) -> Result<f32> {
        let mut buf = [value];
        self.all_reduce_mean(&mut buf).await?;
        Ok(buf[0])
    }
}
