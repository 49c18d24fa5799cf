use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    task::JoinSet,
};

use worker::{
    WorkerErr,
    comm::{Communicator, Star},
};

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;
type DuplexStar = Star<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn channel_pair() -> ((Rx, Tx), (Rx, Tx)) {
    let (stream1, stream2) = io::duplex(1 << 16);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

/// Rank 0 plus `world_size - 1` leaves, links handed to the root in reverse
/// rank order.
async fn star(world_size: usize) -> worker::Result<Vec<DuplexStar>> {
    let mut root_links = Vec::new();
    let mut leaves = JoinSet::new();
    for rank in 1..world_size {
        let (root_side, (rx, tx)) = channel_pair();
        root_links.push(root_side);
        leaves.spawn(Star::leaf(rank, world_size, rx, tx));
    }
    root_links.reverse();

    let mut stars = vec![Star::root(world_size, root_links).await?];
    while let Some(leaf) = leaves.join_next().await {
        stars.push(leaf.expect("leaf task panicked")?);
    }
    stars.sort_by_key(|star| star.rank());

    Ok(stars)
}

#[tokio::test]
async fn handshake_sorts_leaves_by_rank() -> worker::Result<()> {
    let stars = star(4).await?;

    for (i, star) in stars.iter().enumerate() {
        assert_eq!(star.rank(), i);
        assert_eq!(star.world_size(), 4);
    }
    Ok(())
}

#[tokio::test]
async fn all_reduce_is_the_mean_on_every_rank() -> worker::Result<()> {
    let mut stars = star(3).await?;
    let mut leaf2 = stars.pop().unwrap();
    let mut leaf1 = stars.pop().unwrap();
    let mut root = stars.pop().unwrap();

    let mut a = vec![1.0, 2.0, -3.0];
    let mut b = vec![3.0, 4.0, 0.0];
    let mut c = vec![5.0, 9.0, 6.0];

    tokio::try_join!(
        root.all_reduce_mean(&mut a),
        leaf1.all_reduce_mean(&mut b),
        leaf2.all_reduce_mean(&mut c),
    )?;

    assert_eq!(a, [3.0, 5.0, 1.0]);
    assert_eq!(a, b);
    assert_eq!(a, c);

    let (x, y, z) = tokio::try_join!(
        root.mean_scalar(1.0),
        leaf1.mean_scalar(2.0),
        leaf2.mean_scalar(6.0),
    )?;
    assert_eq!((x, y, z), (3.0, 3.0, 3.0));
    Ok(())
}

#[tokio::test]
async fn broadcast_copies_root_params() -> worker::Result<()> {
    let mut stars = star(3).await?;
    let mut leaf2 = stars.pop().unwrap();
    let mut leaf1 = stars.pop().unwrap();
    let mut root = stars.pop().unwrap();

    let mut a = vec![0.5, -1.5];
    let mut b = vec![0.0; 2];
    let mut c = vec![7.0; 2];

    tokio::try_join!(
        root.broadcast(&mut a),
        leaf1.broadcast(&mut b),
        leaf2.broadcast(&mut c),
    )?;

    assert_eq!(b, [0.5, -1.5]);
    assert_eq!(c, [0.5, -1.5]);

    tokio::try_join!(root.finish(), leaf1.finish(), leaf2.finish())?;
    Ok(())
}

#[tokio::test]
async fn mismatched_lengths_fail_the_root() -> worker::Result<()> {
    let mut stars = star(2).await?;
    let mut leaf = stars.pop().unwrap();
    let mut root = stars.pop().unwrap();

    let mut a = vec![1.0, 2.0];
    let mut b = vec![1.0, 2.0, 3.0];

    let res = tokio::try_join!(root.all_reduce_mean(&mut a), leaf.all_reduce_mean(&mut b));
    assert!(matches!(
        res,
        Err(WorkerErr::PayloadLengthMismatch {
            got: 3,
            expected: 2,
            ..
        })
    ));
    Ok(())
}

#[tokio::test]
async fn wrong_world_size_is_refused() -> worker::Result<()> {
    let ((root_rx, root_tx), (leaf_rx, leaf_tx)) = channel_pair();

    let res = tokio::try_join!(
        Star::root(2, vec![(root_rx, root_tx)]),
        Star::leaf(1, 3, leaf_rx, leaf_tx),
    );
    assert!(matches!(res, Err(WorkerErr::Config(_))));
    Ok(())
}

#[tokio::test]
async fn peer_error_is_reported() -> worker::Result<()> {
    let ((root_rx, root_tx), (mut leaf_rx, mut leaf_tx)) = channel_pair();

    let fake_leaf = async move {
        leaf_tx
            .send(&Msg::Control(Command::Hello {
                rank: 1,
                world_size: 2,
            }))
            .await?;

        let mut rx_buf: Vec<u32> = Vec::new();
        let _: Msg = leaf_rx.recv_into(&mut rx_buf).await?;
        leaf_tx.send(&Msg::Err("out of memory".into())).await?;
        Ok::<_, WorkerErr>(())
    };

    let root = async move {
        let mut root = Star::root(2, vec![(root_rx, root_tx)]).await?;
        let mut buf = vec![0.0; 4];
        root.all_reduce_mean(&mut buf).await
    };

    let res = tokio::try_join!(root, fake_leaf);
    assert!(matches!(
        res,
        Err(WorkerErr::PeerError { rank: 1, detail }) if detail == "out of memory"
    ));
    Ok(())
}

#[tokio::test]
async fn oversized_contribution_is_refused() -> worker::Result<()> {
    let ((root_rx, root_tx), (mut leaf_rx, mut leaf_tx)) = channel_pair();

    let fake_leaf = async move {
        leaf_tx
            .send(&Msg::Control(Command::Hello {
                rank: 1,
                world_size: 2,
            }))
            .await?;

        let mut rx_buf: Vec<u32> = Vec::new();
        let _: Msg = leaf_rx.recv_into(&mut rx_buf).await?;
        let huge = vec![0.5f32; 1 << 15];
        leaf_tx.send(&Msg::Data(Payload::Grad(&huge))).await?;
        Ok::<_, WorkerErr>(())
    };

    let root = async move {
        let mut root = Star::root(2, vec![(root_rx, root_tx)]).await?;
        let mut buf = vec![0.0; 4];
        root.all_reduce_mean(&mut buf).await
    };

    let res = tokio::try_join!(root, fake_leaf);
    assert!(matches!(
        res,
        Err(WorkerErr::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData
    ));
    Ok(())
}
