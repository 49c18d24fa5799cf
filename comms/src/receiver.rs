//! The reading end of a worker link.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, DEFAULT_MAX_FRAME, Deserialize, LEN_TYPE_SIZE, LenType};

/// Reads length prefixed frames sent by an `OnoSender` on the other side of
/// a link.
///
/// Frames announcing more than `max_frame` bytes are refused before anything
/// is allocated for them.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Bounds the size of every following frame, in bytes after the length
    /// prefix.
    pub fn set_max_frame(&mut self, bytes: usize) {
        self.max_frame = bytes;
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Reads one frame into `buf` and decodes it in place.
    ///
    /// `buf` is reused across calls: a gradient or parameter payload is handed
    /// back as a view into it, so steady state training does not allocate.
    ///
    /// # Errors
    /// `InvalidData` if the announced length is over the frame limit or the
    /// body does not decode, any error of the underlying reader otherwise.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;

        let announced = LenType::from_be_bytes(size_buf);
        let len = match usize::try_from(announced) {
            Ok(len) if len <= self.max_frame => len,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "frame of {announced} bytes is over the limit of {} bytes",
                        self.max_frame
                    ),
                ));
            }
        };

        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let view: &mut [u8] = bytemuck::cast_slice_mut(buf.as_mut_slice());
        let frame = &mut view[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
