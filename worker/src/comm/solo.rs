use super::Communicator;
use crate::error::Result;

/// The group of one. Every collective is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct Solo;

#[async_trait::async_trait]
impl Communicator for Solo {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    async fn all_reduce_mean(&mut self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    async fn broadcast(&mut self, _buf: &mut [f32]) -> Result<()> {
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collectives_leave_buffers_untouched() {
        let mut solo = Solo;
        let mut buf = [1.0, -2.5, 3.0];

        solo.all_reduce_mean(&mut buf).await.unwrap();
        solo.broadcast(&mut buf).await.unwrap();
        assert_eq!(buf, [1.0, -2.5, 3.0]);
        assert_eq!(solo.mean_scalar(4.5).await.unwrap(), 4.5);
        solo.finish().await.unwrap();
    }
}
