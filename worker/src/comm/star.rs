use std::time::Duration;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::{Instant, sleep},
};

use super::Communicator;
use crate::{
    context::RuntimeContext,
    error::{Result, WorkerErr},
};

const CONNECT_BACKOFF: Duration = Duration::from_millis(200);

/// Largest handshake, disconnect or error frame accepted from a peer.
const CONTROL_FRAME_LIMIT: usize = 64 * 1024;

/// Largest frame accepted while exchanging `len` floats.
fn float_frame_limit(len: usize) -> usize {
    Payload::frame_len(len).max(CONTROL_FRAME_LIMIT)
}

/// A star over TCP, as built by `listen` and `connect`.
pub type TcpStar = Star<OwnedReadHalf, OwnedWriteHalf>;

struct Peer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
}

enum Role<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Rank 0, with one link per other rank sorted by rank.
    Root { leaves: Vec<Peer<R, W>> },
    Leaf { root: Peer<R, W> },
}

/// Root and leaves collectives.
///
/// Leaves send their buffer to rank 0, which sums the contributions in rank
/// order, divides by the world size and sends the result back. Every rank
/// therefore ends up with bit-identical values.
pub struct Star<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    role: Role<R, W>,
    rx_buf: Vec<u32>,
    round: usize,
}

impl<R, W> Star<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Builds rank 0 from one link per leaf, in any order.
    ///
    /// Each leaf must open with `Hello`; the links are then sorted by the rank
    /// they announced.
    pub async fn root(world_size: usize, links: Vec<(OnoReceiver<R>, OnoSender<W>)>) -> Result<Self> {
        if links.len() + 1 != world_size {
            return Err(WorkerErr::Config(format!(
                "root of a world of {world_size} got {} links",
                links.len()
            )));
        }

        let mut rx_buf = Vec::new();
        let mut slots: Vec<Option<Peer<R, W>>> = (1..world_size).map(|_| None).collect();

        for (mut rx, tx) in links {
            rx.set_max_frame(CONTROL_FRAME_LIMIT);
            let rank = match rx.recv_into(&mut rx_buf).await? {
                Msg::Control(Command::Hello {
                    rank,
                    world_size: theirs,
                }) if theirs == world_size && (1..world_size).contains(&rank) => rank,
                Msg::Control(Command::Hello { rank, world_size: theirs }) => {
                    return Err(WorkerErr::Config(format!(
                        "leaf announced rank {rank} of {theirs}, expected a rank of {world_size}"
                    )));
                }
                other => return Err(WorkerErr::UnexpectedMessage { step: 0, got: other.kind() }),
            };

            let slot = &mut slots[rank - 1];
            if slot.is_some() {
                return Err(WorkerErr::Config(format!("rank {rank} joined twice")));
            }
            debug!(rank = rank; "leaf joined");
            *slot = Some(Peer { rank, rx, tx });
        }

        let mut leaves: Vec<Peer<R, W>> = slots.into_iter().flatten().collect();
        for leaf in &mut leaves {
            let hello = Msg::Control(Command::Hello { rank: 0, world_size });
            leaf.tx.send(&hello).await?;
        }

        Ok(Self {
            rank: 0,
            world_size,
            role: Role::Root { leaves },
            rx_buf,
            round: 0,
        })
    }

    /// Builds a leaf from its link to rank 0.
    pub async fn leaf(
        rank: usize,
        world_size: usize,
        mut rx: OnoReceiver<R>,
        mut tx: OnoSender<W>,
    ) -> Result<Self> {
        if rank == 0 || rank >= world_size {
            return Err(WorkerErr::Config(format!(
                "rank {rank} cannot be a leaf of a world of {world_size}"
            )));
        }

        rx.set_max_frame(CONTROL_FRAME_LIMIT);
        tx.send(&Msg::Control(Command::Hello { rank, world_size }))
            .await?;

        let mut rx_buf = Vec::new();
        match rx.recv_into(&mut rx_buf).await? {
            Msg::Control(Command::Hello {
                rank: 0,
                world_size: theirs,
            }) if theirs == world_size => {}
            Msg::Err(detail) => {
                return Err(WorkerErr::PeerError {
                    rank: 0,
                    detail: detail.into_owned(),
                });
            }
            other => return Err(WorkerErr::UnexpectedMessage { step: 0, got: other.kind() }),
        }
        debug!(rank = rank; "joined root");

        Ok(Self {
            rank,
            world_size,
            role: Role::Leaf {
                root: Peer { rank: 0, rx, tx },
            },
            rx_buf,
            round: 0,
        })
    }
}

/// Checks that `msg` carries floats of the wanted kind and length.
fn floats<'a>(
    msg: Msg<'a>,
    want_params: bool,
    from: usize,
    round: usize,
    expected: usize,
) -> Result<&'a [f32]> {
    let nums: &'a [f32] = match msg {
        Msg::Data(Payload::Grad(nums)) if !want_params => nums,
        Msg::Data(Payload::Params(nums)) if want_params => nums,
        Msg::Err(detail) => {
            return Err(WorkerErr::PeerError {
                rank: from,
                detail: detail.into_owned(),
            });
        }
        other => {
            return Err(WorkerErr::UnexpectedMessage {
                step: round,
                got: other.kind(),
            });
        }
    };

    if nums.len() != expected {
        return Err(WorkerErr::PayloadLengthMismatch {
            step: round,
            got: nums.len(),
            expected,
        });
    }

    Ok(nums)
}

#[async_trait::async_trait]
impl<R, W> Communicator for Star<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn all_reduce_mean(&mut self, buf: &mut [f32]) -> Result<()> {
        let Self {
            role,
            rx_buf,
            round,
            world_size,
            ..
        } = self;
        *round += 1;

        match role {
            Role::Root { leaves } => {
                for leaf in leaves.iter_mut() {
                    leaf.rx.set_max_frame(float_frame_limit(buf.len()));
                    let msg = leaf.rx.recv_into(rx_buf).await?;
                    let theirs = floats(msg, false, leaf.rank, *round, buf.len())?;
                    buf.iter_mut().zip(theirs).for_each(|(acc, x)| *acc += x);
                }

                let n = *world_size as f32;
                buf.iter_mut().for_each(|x| *x /= n);

                let msg = Msg::Data(Payload::Grad(buf));
                for leaf in leaves.iter_mut() {
                    leaf.tx.send(&msg).await?;
                }
            }
            Role::Leaf { root } => {
                root.tx.send(&Msg::Data(Payload::Grad(buf))).await?;

                root.rx.set_max_frame(float_frame_limit(buf.len()));
                let msg = root.rx.recv_into(rx_buf).await?;
                let mean = floats(msg, false, 0, *round, buf.len())?;
                buf.copy_from_slice(mean);
            }
        }

        Ok(())
    }

    async fn broadcast(&mut self, buf: &mut [f32]) -> Result<()> {
        let Self {
            role,
            rx_buf,
            round,
            ..
        } = self;
        *round += 1;

        match role {
            Role::Root { leaves } => {
                let msg = Msg::Data(Payload::Params(buf));
                for leaf in leaves.iter_mut() {
                    leaf.tx.send(&msg).await?;
                }
            }
            Role::Leaf { root } => {
                root.rx.set_max_frame(float_frame_limit(buf.len()));
                let msg = root.rx.recv_into(rx_buf).await?;
                let params = floats(msg, true, 0, *round, buf.len())?;
                buf.copy_from_slice(params);
            }
        }

        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        let Self { role, rx_buf, round, .. } = self;
        let bye = Msg::Control(Command::Disconnect);

        match role {
            Role::Root { leaves } => {
                for leaf in leaves.iter_mut() {
                    leaf.rx.set_max_frame(CONTROL_FRAME_LIMIT);
                    match leaf.rx.recv_into(rx_buf).await? {
                        Msg::Control(Command::Disconnect) => {}
                        other => {
                            return Err(WorkerErr::UnexpectedMessage {
                                step: *round,
                                got: other.kind(),
                            });
                        }
                    }
                    leaf.tx.send(&bye).await?;
                }
            }
            Role::Leaf { root } => {
                root.tx.send(&bye).await?;
                root.rx.set_max_frame(CONTROL_FRAME_LIMIT);
                while !matches!(
                    root.rx.recv_into(rx_buf).await?,
                    Msg::Control(Command::Disconnect)
                ) {}
            }
        }

        debug!(rank = self.rank; "disconnected");
        Ok(())
    }
}

/// Rank 0 side of the rendezvous: accepts one connection per other rank.
pub async fn listen(ctx: &RuntimeContext) -> Result<TcpStar> {
    let listener = TcpListener::bind(&ctx.master_addr).await?;
    info!("rendezvous listening at {}", ctx.master_addr);

    let mut links = Vec::with_capacity(ctx.world_size - 1);
    while links.len() + 1 < ctx.world_size {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!("connection from {addr}");

        let (rx, tx) = stream.into_split();
        links.push(comms::channel(rx, tx));
    }

    Star::root(ctx.world_size, links).await
}

/// Leaf side of the rendezvous. Retries until rank 0 is listening or
/// `deadline` has elapsed.
pub async fn connect(ctx: &RuntimeContext, deadline: Duration) -> Result<TcpStar> {
    let give_up = Instant::now() + deadline;

    let stream = loop {
        match TcpStream::connect(&ctx.master_addr).await {
            Ok(stream) => break stream,
            Err(e) if Instant::now() < give_up => {
                debug!("master not reachable yet: {e}");
                sleep(CONNECT_BACKOFF).await;
            }
            Err(e) => return Err(e.into()),
        }
    };
    stream.set_nodelay(true)?;

    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    Star::leaf(ctx.rank, ctx.world_size, rx, tx).await
}
