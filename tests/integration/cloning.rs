use std::collections::BTreeMap;

use treeclone_core::{Selection, DEFAULT_CHUNK_SIZE};
use treeclone_services::{ChunkOutcome, Dispatched, Phase};

use crate::*;

const R: &str = "10.0.0.5";
const S: &str = "10.0.0.9";

/// Request, Response, Summary, then three Cloning chunks rebuilding a
/// 10000-byte file on the requester.
#[tokio::test]
async fn test_request_summary_clone_roundtrip() {
    let mut net = Network::new();
    let mut r = net.peer(R);
    let mut s = net.peer(S);

    let data = crate::pattern(10_000);
    let source = s.write_file("data.bin", &data);
    let destination = r.root.join("incoming").join("data.bin");

    // 1. R broadcasts. Its own copy comes back and is dropped.
    assert_eq!(r.engine.send_request().await.unwrap(), 0);
    assert!(matches!(r.next_event().await, Dispatched::SelfEcho));

    // 2. S answers with its listing.
    match s.next_event().await {
        Dispatched::Responded { to } => assert_eq!(to, R),
        other => panic!("expected response from S, got {other:?}"),
    }

    // 3. R records S as a responder.
    match r.next_event().await {
        Dispatched::ResponseRecorded { from, snapshot } => {
            assert_eq!(from, S);
            let listing: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(snapshot).unwrap()).unwrap();
            let entry = &listing["share"]["CHILDREN"]["data.bin"];
            assert_eq!(entry["SIZE"], 10_000);
            assert_eq!(entry["ADDRESS"], S);
        }
        other => panic!("expected recorded response, got {other:?}"),
    }
    assert_eq!(r.engine.responders().await, vec![S.to_string()]);
    assert_eq!(r.engine.phase().await, Phase::ReadyToSummarize);

    // 4. R asks S for one file.
    let mut selections = BTreeMap::new();
    selections.insert(
        S.to_string(),
        vec![Selection::new(path_str(&source), path_str(&destination))],
    );
    let report = r.engine.send_summary(&selections).await;
    assert_eq!(report.sent, vec![S.to_string()]);

    // 5. S streams it in three chunks.
    match s.next_event().await {
        Dispatched::TransfersStarted { to, transfers, skipped } => {
            assert_eq!(to, R);
            assert_eq!(skipped, 0);
            assert_eq!(transfers.len(), 1);
            for t in transfers {
                let sent = t.await.unwrap().unwrap();
                assert_eq!(sent.chunks_sent, 3);
                assert_eq!(sent.bytes_sent, 10_000);
            }
        }
        other => panic!("expected transfers, got {other:?}"),
    }
    assert_eq!(10_000usize.div_ceil(DEFAULT_CHUNK_SIZE), 3);

    // 6. R rebuilds the file, chunk by chunk, in order.
    assert!(matches!(
        r.next_event().await,
        Dispatched::Chunk(ChunkOutcome::Written { index: 0, total: 3 })
    ));
    assert!(matches!(
        r.next_event().await,
        Dispatched::Chunk(ChunkOutcome::Written { index: 1, total: 3 })
    ));
    match r.next_event().await {
        Dispatched::Chunk(ChunkOutcome::Completed { path, chunks, bytes }) => {
            assert_eq!(path, destination);
            assert_eq!(chunks, 3);
            assert_eq!(bytes, 10_000);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(std::fs::read(&destination).unwrap(), data);
    assert_eq!(r.engine.phase().await, Phase::CloningInProgress);
    assert!(r.engine.incoming().await.is_empty());
}

/// Several files, one malformed line, and an empty file in one Summary.
#[tokio::test]
async fn test_summary_batch_with_bad_line_and_empty_file() {
    let mut net = Network::new();
    let mut r = net.peer(R);
    let mut s = net.peer(S);

    let small = s.write_file("docs/small.txt", b"hello");
    let empty = s.write_file("empty.txt", b"");
    let big_data = crate::pattern(3 * DEFAULT_CHUNK_SIZE + 1);
    let big = s.write_file("big.bin", &big_data);

    let out = r.root.join("out");
    let mut selections = BTreeMap::new();
    selections.insert(
        S.to_string(),
        vec![
            Selection::new(path_str(&small), path_str(&out.join("small.txt"))),
            Selection::new("only-one-field", ""),
            Selection::new(path_str(&empty), path_str(&out.join("empty.txt"))),
            Selection::new(path_str(&big), path_str(&out.join("big.bin"))),
        ],
    );
    r.engine.send_summary(&selections).await;

    match s.next_event().await {
        Dispatched::TransfersStarted { transfers, skipped, .. } => {
            assert_eq!(skipped, 1);
            assert_eq!(transfers.len(), 3);
            for t in transfers {
                t.await.unwrap().unwrap();
            }
        }
        other => panic!("expected transfers, got {other:?}"),
    }

    // 1 + 1 + 4 chunks, interleaved across files.
    let mut completed = Vec::new();
    for _ in 0..6 {
        if let Dispatched::Chunk(ChunkOutcome::Completed { path, .. }) = r.next_event().await {
            completed.push(path);
        }
    }
    completed.sort();
    assert_eq!(completed.len(), 3);

    assert_eq!(std::fs::read(out.join("small.txt")).unwrap(), b"hello");
    assert_eq!(std::fs::read(out.join("empty.txt")).unwrap(), b"");
    assert_eq!(std::fs::read(out.join("big.bin")).unwrap(), big_data);
}

/// Cancelling does not stop chunks already on their way.
#[tokio::test]
async fn test_cancel_is_advisory() {
    let mut net = Network::new();
    let mut r = net.peer(R);
    let mut s = net.peer(S);

    let data = crate::pattern(2 * DEFAULT_CHUNK_SIZE);
    let source = s.write_file("late.bin", &data);
    let destination = r.root.join("late.bin");

    let mut selections = BTreeMap::new();
    selections.insert(
        S.to_string(),
        vec![Selection::new(path_str(&source), path_str(&destination))],
    );
    r.engine.send_summary(&selections).await;
    assert_eq!(r.engine.cancel_cloning().await, 1);

    if let Dispatched::TransfersStarted { transfers, .. } = s.next_event().await {
        for t in transfers {
            t.await.unwrap().unwrap();
        }
    }
    r.next_event().await;
    assert!(matches!(
        r.next_event().await,
        Dispatched::Chunk(ChunkOutcome::Completed { .. })
    ));
    assert_eq!(std::fs::read(&destination).unwrap(), data);
    assert_eq!(r.engine.epoch(), 1);
}
