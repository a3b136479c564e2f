use std::collections::BTreeMap;

use treeclone_core::Selection;
use treeclone_services::Dispatched;

use crate::*;

/// One Request reaches every peer; each answers and all land in the
/// requester's responder set.
#[tokio::test]
async fn test_request_fans_out_to_all_peers() {
    let mut net = Network::new();
    let mut a = net.peer("10.0.0.1");
    let mut b = net.peer("10.0.0.2");
    let mut c = net.peer("10.0.0.3");
    assert_eq!(net.registry().len(), 3);

    a.engine.send_request().await.unwrap();
    assert!(matches!(a.next_event().await, Dispatched::SelfEcho));
    assert!(matches!(b.next_event().await, Dispatched::Responded { .. }));
    assert!(matches!(c.next_event().await, Dispatched::Responded { .. }));

    for _ in 0..2 {
        assert!(matches!(
            a.next_event().await,
            Dispatched::ResponseRecorded { .. }
        ));
    }
    let mut responders = a.engine.responders().await;
    responders.sort();
    assert_eq!(responders, vec!["10.0.0.2", "10.0.0.3"]);

    b.assert_quiet().await;
    c.assert_quiet().await;
}

/// A second request round replaces snapshots rather than adding peers.
#[tokio::test]
async fn test_repeat_request_overwrites_snapshot() {
    let mut net = Network::new();
    let mut a = net.peer("10.0.0.1");
    let mut b = net.peer("10.0.0.2");

    for round in 0..2 {
        b.write_file(&format!("round-{round}.txt"), b"x");
        a.engine.send_request().await.unwrap();
        a.next_event().await;
        b.next_event().await;
        a.next_event().await;
    }

    assert_eq!(a.engine.responders().await, vec!["10.0.0.2".to_string()]);
    let snapshot = std::fs::read_to_string(a.engine.snapshot_path("10.0.0.2")).unwrap();
    let listing: serde_json::Value = serde_json::from_str(&snapshot).unwrap();
    let children = listing["share"]["CHILDREN"].as_object().unwrap();
    assert_eq!(children.len(), 2);
}

/// A Summary addressed to a peer that never joined goes nowhere.
#[tokio::test]
async fn test_unknown_recipient_is_dropped() {
    let mut net = Network::new();
    let mut a = net.peer("10.0.0.1");
    let mut b = net.peer("10.0.0.2");

    let mut selections = BTreeMap::new();
    selections.insert(
        "10.0.0.77".to_string(),
        vec![Selection::new("/S/a", "/R/a")],
    );
    let report = a.engine.send_summary(&selections).await;
    assert_eq!(report.sent, vec!["10.0.0.77".to_string()]);

    a.assert_quiet().await;
    b.assert_quiet().await;
}

/// Two requesters do not see each other's self-echo as their own.
#[tokio::test]
async fn test_peers_answer_each_other() {
    let mut net = Network::new();
    let mut a = net.peer("10.0.0.1");
    let mut b = net.peer("10.0.0.2");

    a.engine.send_request().await.unwrap();
    b.engine.send_request().await.unwrap();

    // Each peer sees: its own echo, the other's request, the other's response.
    for peer in [&mut a, &mut b] {
        let mut echoes = 0;
        let mut responded = 0;
        let mut recorded = 0;
        for _ in 0..3 {
            match peer.next_event().await {
                Dispatched::SelfEcho => echoes += 1,
                Dispatched::Responded { .. } => responded += 1,
                Dispatched::ResponseRecorded { .. } => recorded += 1,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!((echoes, responded, recorded), (1, 1, 1));
    }
}
