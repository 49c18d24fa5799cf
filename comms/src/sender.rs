//! The writing end of a worker link.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// Writes handshakes, gradient contributions and parameter snapshots to one
/// peer, each as a single length prefixed frame.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    head: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self { tx, head: Vec::new() }
    }

    /// Sends `msg` and flushes.
    ///
    /// Only the prefix, the kind header and any JSON command go through the
    /// internal buffer. A float payload is written straight from the caller's
    /// slice, so a full gradient is never copied on the way out.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { head, tx } = self;

        head.clear();
        head.resize(LEN_TYPE_SIZE, 0);

        let body = msg.serialize(head);
        let body_len = body.map_or(0, <[u8]>::len);
        let frame_len = (head.len() - LEN_TYPE_SIZE + body_len) as LenType;
        head[..LEN_TYPE_SIZE].copy_from_slice(&frame_len.to_be_bytes());

        tx.write_all(head).await?;
        if let Some(body) = body {
            tx.write_all(body).await?;
        }

        tx.flush().await
    }
}
