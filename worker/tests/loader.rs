use std::{collections::HashSet, fs};

use worker::{
    WorkerErr,
    data::{Corpus, ShardedLoader},
};

fn ramp(n: u32) -> Vec<u32> {
    (0..n).collect()
}

#[test]
fn ten_thousand_token_shard_wraps_after_1249_fetches() {
    let corpus = Corpus::from_memory("train", vec![ramp(10_000)]).unwrap();
    let mut loader = ShardedLoader::new(corpus, 2, 4, 0, 1).unwrap();

    let first = loader.next_batch().unwrap();
    assert_eq!(first.inputs.as_slice().unwrap(), &ramp(8)[..]);
    assert_eq!(first.targets.as_slice().unwrap(), &(1..9).collect::<Vec<_>>()[..]);
    assert_eq!(loader.position(), (0, 8));

    let second = loader.next_batch().unwrap();
    assert_eq!(second.inputs.as_slice().unwrap(), &(8..16).collect::<Vec<_>>()[..]);

    for _ in 2..1248 {
        loader.next_batch().unwrap();
    }
    assert_eq!(loader.position(), (0, 1248 * 8));

    let last = loader.next_batch().unwrap();
    assert_eq!(last.inputs[[0, 0]], 1248 * 8);
    assert_eq!(loader.position(), (0, 0));

    assert_eq!(loader.next_batch().unwrap(), first);
}

#[test]
fn single_worker_covers_each_window_once_per_pass() {
    let corpus = Corpus::from_memory("train", vec![ramp(103), (1000..1050).collect()]).unwrap();
    let mut loader = ShardedLoader::new(corpus, 3, 4, 0, 1).unwrap();

    let mut seen = Vec::new();
    loop {
        let batch = loader.next_batch().unwrap();
        seen.extend(batch.inputs.iter().copied());
        if loader.position() == (0, 0) {
            break;
        }
    }

    // 103 tokens hold 8 windows of 12 (+1 target), 50 tokens hold 4.
    let expected: Vec<u32> = (0..96).chain(1000..1048).collect();
    assert_eq!(seen, expected);
}

#[test]
fn ranks_read_disjoint_windows() {
    let world_size = 3;
    let (b, t) = (2, 4);
    let corpus = Corpus::from_memory("train", vec![ramp(500)]).unwrap();

    let mut seen: HashSet<u32> = HashSet::new();
    let mut total = 0;
    for rank in 0..world_size {
        let mut loader = ShardedLoader::new(corpus.clone(), b, t, rank, world_size).unwrap();
        for _ in 0..5 {
            let batch = loader.next_batch().unwrap();
            total += batch.inputs.len();
            seen.extend(batch.inputs.iter().copied());
        }
    }

    assert_eq!(total, 3 * 5 * 8);
    assert_eq!(seen.len(), total, "ranks overlapped");
    assert_eq!(seen, (0..120).collect::<HashSet<u32>>());
}

#[test]
fn loads_shards_from_disk_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    let raw = |tokens: &[u16]| -> Vec<u8> { tokens.iter().flat_map(|t| t.to_le_bytes()).collect() };

    fs::write(dir.path().join("edu_train_001"), raw(&[50, 51, 52, 53, 54])).unwrap();
    fs::write(dir.path().join("edu_train_000"), raw(&[10, 11, 12, 13, 14])).unwrap();
    fs::write(dir.path().join("edu_val_000"), raw(&[1, 2, 3, 4, 5])).unwrap();

    let corpus = Corpus::discover(dir.path(), "train").unwrap();
    let mut loader = ShardedLoader::new(corpus, 1, 4, 0, 1).unwrap();

    let batch = loader.next_batch().unwrap();
    assert_eq!(batch.inputs.as_slice().unwrap(), &[10, 11, 12, 13]);
    assert_eq!(batch.targets.as_slice().unwrap(), &[11, 12, 13, 14]);

    let batch = loader.next_batch().unwrap();
    assert_eq!(batch.inputs.as_slice().unwrap(), &[50, 51, 52, 53]);
}

#[test]
fn a_too_short_later_shard_fails_on_switch() {
    let corpus = Corpus::from_memory("train", vec![ramp(6), ramp(3)]).unwrap();
    let mut loader = ShardedLoader::new(corpus, 1, 4, 0, 1).unwrap();

    // the first window fits, the next fetch needs the short shard
    assert!(loader.next_batch().is_ok());
    let err = loader.next_batch().unwrap_err();
    assert!(matches!(err, WorkerErr::ShardTooShort { len: 3, needed: 5, .. }));
    assert_eq!(loader.position(), (0, 4));
}
