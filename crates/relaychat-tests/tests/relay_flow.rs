use relaychat::protocol::Event;
use relaychat_node::peers::LinkDirection;
use relaychat_tests::harness::client::TestClient;
use relaychat_tests::harness::node::{NodeSlot, TestNode};
use relaychat_tests::harness::peer::{TestPeer, packet};
use relaychat_tests::harness::{STEP_TIMEOUT, init_tracing, wait_until};
use std::time::Duration;

#[tokio::test]
async fn two_nodes_exchange_chat() {
    init_tracing();
    let nodes = TestNode::spawn_mesh(&["A", "B"]).await.unwrap();
    let (a, b) = (&nodes[0], &nodes[1]);

    let mut alice = TestClient::login_as(a.addr, "alice").await.unwrap();
    let mut bob = TestClient::login_as(b.addr, "bob").await.unwrap();

    alice.say("hi from A").await.unwrap();
    let seen_by_bob = bob.expect_msg("hi from A").await.unwrap();
    let seen_by_alice = alice.expect_msg("hi from A").await.unwrap();
    assert_eq!(seen_by_bob.from, "alice");
    assert_eq!(seen_by_bob.server, "A");
    assert_eq!(seen_by_bob, seen_by_alice);

    bob.say("hi from B").await.unwrap();
    let record = alice.expect_msg("hi from B").await.unwrap();
    assert_eq!(record.server, "B");
}

#[tokio::test]
async fn same_username_on_different_nodes_is_allowed() {
    let nodes = TestNode::spawn_mesh(&["A", "B"]).await.unwrap();
    TestClient::login_as(nodes[0].addr, "sam").await.unwrap();
    TestClient::login_as(nodes[1].addr, "sam").await.unwrap();
}

#[tokio::test]
async fn join_notices_stay_on_the_local_node() {
    let nodes = TestNode::spawn_mesh(&["A", "B"]).await.unwrap();
    let mut alice = TestClient::login_as(nodes[0].addr, "alice").await.unwrap();
    let _bob = TestClient::login_as(nodes[1].addr, "bob").await.unwrap();

    assert_eq!(alice.event_within(Duration::from_millis(300)).await, None);
}

#[tokio::test]
async fn three_node_mesh_delivers_exactly_once() {
    let nodes = TestNode::spawn_mesh(&["A", "B", "C"]).await.unwrap();
    let mut clients = Vec::new();
    for (node, name) in nodes.iter().zip(["alice", "bob", "carol"]) {
        clients.push(TestClient::login_as(node.addr, name).await.unwrap());
    }

    clients[0].say("to everyone").await.unwrap();
    for client in &mut clients {
        client.expect_msg("to everyone").await.unwrap();
        assert_eq!(client.event_within(Duration::from_millis(300)).await, None);
    }
}

#[tokio::test]
async fn relayed_lines_are_not_forwarded_again() {
    // A - B - C in a line: A and C only know B.
    let a_slot = NodeSlot::bind("A").await.unwrap();
    let b_slot = NodeSlot::bind("B").await.unwrap();
    let c_slot = NodeSlot::bind("C").await.unwrap();
    let b_peer = b_slot.peer_config();
    let b = b_slot.start(vec![]).await.unwrap();
    let a = a_slot.start(vec![b_peer.clone()]).await.unwrap();
    let c = c_slot.start(vec![b_peer]).await.unwrap();
    a.wait_for_peers(1).await.unwrap();
    c.wait_for_peers(1).await.unwrap();
    b.wait_for_peers(2).await.unwrap();

    let mut alice = TestClient::login_as(a.addr, "alice").await.unwrap();
    let mut bob = TestClient::login_as(b.addr, "bob").await.unwrap();
    let mut carol = TestClient::login_as(c.addr, "carol").await.unwrap();

    alice.say("one hop").await.unwrap();
    bob.expect_msg("one hop").await.unwrap();
    assert_eq!(carol.event_within(Duration::from_millis(500)).await, None);
}

#[tokio::test]
async fn duplicate_relay_is_delivered_once() {
    let node = TestNode::spawn("A").await.unwrap();
    let mut alice = TestClient::login_as(node.addr, "alice").await.unwrap();
    let mut peer = TestPeer::connect(node.addr, "B").await.unwrap();
    node.wait_for_peers(1).await.unwrap();

    let p = packet("B", "bob", "once please", 1_700_000_000.25);
    peer.relay(p.clone()).await.unwrap();
    peer.relay(p.clone()).await.unwrap();

    let record = alice.expect_msg("once please").await.unwrap();
    assert_eq!(record.from, "bob");
    assert_eq!(record.server, "B");
    assert_eq!(record.timestamp, 1_700_000_000.25);
    assert_eq!(alice.event_within(Duration::from_millis(300)).await, None);

    // Same text at a different time is a new line.
    peer.relay(packet("B", "bob", "once please", 1_700_000_001.0))
        .await
        .unwrap();
    alice.expect_msg("once please").await.unwrap();
}

#[tokio::test]
async fn duplicate_relay_over_a_second_link_is_ignored() {
    let node = TestNode::spawn("A").await.unwrap();
    let mut alice = TestClient::login_as(node.addr, "alice").await.unwrap();
    let mut via_b = TestPeer::connect(node.addr, "B").await.unwrap();
    let mut via_c = TestPeer::connect(node.addr, "C").await.unwrap();
    node.wait_for_peers(2).await.unwrap();

    let p = packet("B", "bob", "fan-in", 42.5);
    via_b.relay(p.clone()).await.unwrap();
    via_c.relay(p).await.unwrap();

    alice.expect_msg("fan-in").await.unwrap();
    assert_eq!(alice.event_within(Duration::from_millis(300)).await, None);
}

#[tokio::test]
async fn echo_of_own_line_is_ignored() {
    let node = TestNode::spawn("A").await.unwrap();
    let mut peer = TestPeer::connect(node.addr, "B").await.unwrap();
    node.wait_for_peers(1).await.unwrap();
    let mut alice = TestClient::login_as(node.addr, "alice").await.unwrap();

    alice.say("boomerang").await.unwrap();
    alice.expect_msg("boomerang").await.unwrap();

    // The peer receives the relay and bounces it straight back.
    let relayed = peer.next_relay().await.unwrap();
    assert_eq!(relayed.origin_server, "A");
    assert_eq!(relayed.from, "alice");
    peer.relay(relayed).await.unwrap();

    assert_eq!(alice.event_within(Duration::from_millis(300)).await, None);
}

#[tokio::test]
async fn local_line_reaches_every_linked_peer() {
    let node = TestNode::spawn("A").await.unwrap();
    let mut b = TestPeer::connect(node.addr, "B").await.unwrap();
    let mut c = TestPeer::connect(node.addr, "C").await.unwrap();
    node.wait_for_peers(2).await.unwrap();

    let mut alice = TestClient::login_as(node.addr, "alice").await.unwrap();
    alice.say("fan-out").await.unwrap();

    for peer in [&mut b, &mut c] {
        let relayed = peer.next_relay().await.unwrap();
        assert_eq!(relayed.text, "fan-out");
        assert_eq!(relayed.origin_server, "A");
    }
}

#[tokio::test]
async fn relayed_lines_reach_peers_only_from_local_clients() {
    let node = TestNode::spawn("A").await.unwrap();
    let mut b = TestPeer::connect(node.addr, "B").await.unwrap();
    let mut c = TestPeer::connect(node.addr, "C").await.unwrap();
    node.wait_for_peers(2).await.unwrap();

    b.relay(packet("B", "bob", "from b", 7.0)).await.unwrap();
    assert_eq!(c.relay_within(Duration::from_millis(300)).await, None);
}

#[tokio::test]
async fn dropped_peer_link_is_removed() {
    let node = TestNode::spawn("A").await.unwrap();
    let peer = TestPeer::connect(node.addr, "B").await.unwrap();
    node.wait_for_peers(1).await.unwrap();
    assert_eq!(node.state.peers.direction("B"), Some(LinkDirection::Inbound));

    drop(peer);
    assert!(wait_until(STEP_TIMEOUT, || node.state.peers.is_empty()).await);

    // Local chat is unaffected.
    let mut alice = TestClient::login_as(node.addr, "alice").await.unwrap();
    alice.say("still works").await.unwrap();
    alice.expect_msg("still works").await.unwrap();
}

#[tokio::test]
async fn newer_link_survives_cleanup_of_older_one() {
    let node = TestNode::spawn("A").await.unwrap();
    let old = TestPeer::connect(node.addr, "B").await.unwrap();
    node.wait_for_peers(1).await.unwrap();
    let mut new = TestPeer::connect(node.addr, "B").await.unwrap();
    // Let the second handshake replace the first entry.
    tokio::time::sleep(Duration::from_millis(200)).await;

    drop(old);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(node.state.peers.contains("B"));

    let mut alice = TestClient::login_as(node.addr, "alice").await.unwrap();
    alice.say("to the new link").await.unwrap();
    let relayed = new.next_relay().await.unwrap();
    assert_eq!(relayed.text, "to the new link");
}

#[tokio::test]
async fn unreachable_peer_does_not_block_local_chat_or_healthy_peers() {
    // Reserve an address nobody listens on.
    let dead = NodeSlot::bind("Z").await.unwrap();
    let dead_peer = dead.peer_config();
    drop(dead);

    let b_slot = NodeSlot::bind("B").await.unwrap();
    let a_slot = NodeSlot::bind("A").await.unwrap();
    let a_peer = a_slot.peer_config();
    let a = a_slot
        .start(vec![dead_peer, b_slot.peer_config()])
        .await
        .unwrap();
    let b = b_slot.start(vec![a_peer]).await.unwrap();
    a.wait_for_peers(1).await.unwrap();
    b.wait_for_peers(1).await.unwrap();
    assert!(!a.state.peers.contains("Z"));

    let mut alice = TestClient::login_as(a.addr, "alice").await.unwrap();
    let mut bob = TestClient::login_as(b.addr, "bob").await.unwrap();
    alice.say("despite Z").await.unwrap();
    alice.expect_msg("despite Z").await.unwrap();
    bob.expect_msg("despite Z").await.unwrap();
}

#[tokio::test]
async fn connector_retries_until_peer_comes_up() {
    let b_slot = NodeSlot::bind("B").await.unwrap();
    let b_peer = b_slot.peer_config();
    let b_addr = b_slot.addr;
    drop(b_slot);

    let a = NodeSlot::bind("A").await.unwrap().start(vec![b_peer]).await.unwrap();
    // A few failed attempts at the retry interval.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(a.state.peers.is_empty());

    let b = NodeSlot::bind_addr("B", b_addr)
        .await
        .unwrap()
        .start(vec![])
        .await
        .unwrap();
    a.wait_for_peers(1).await.unwrap();
    b.wait_for_peers(1).await.unwrap();
    assert_eq!(a.state.peers.direction("B"), Some(LinkDirection::Outbound));

    let mut bob = TestClient::login_as(b.addr, "bob").await.unwrap();
    let mut alice = TestClient::login_as(a.addr, "alice").await.unwrap();
    alice.say("you're up").await.unwrap();
    bob.expect_msg("you're up").await.unwrap();
}

#[tokio::test]
async fn connector_reconnects_after_peer_restart() {
    let b_slot = NodeSlot::bind("B").await.unwrap();
    let b_addr = b_slot.addr;
    let a = NodeSlot::bind("A")
        .await
        .unwrap()
        .start(vec![b_slot.peer_config()])
        .await
        .unwrap();
    let b = b_slot.start(vec![]).await.unwrap();
    a.wait_for_peers(1).await.unwrap();

    drop(b);
    assert!(wait_until(STEP_TIMEOUT, || a.state.peers.is_empty()).await);

    let b = NodeSlot::bind_addr("B", b_addr)
        .await
        .unwrap()
        .start(vec![])
        .await
        .unwrap();
    a.wait_for_peers(1).await.unwrap();
    b.wait_for_peers(1).await.unwrap();

    let mut bob = TestClient::login_as(b.addr, "bob").await.unwrap();
    let mut alice = TestClient::login_as(a.addr, "alice").await.unwrap();
    alice.say("welcome back").await.unwrap();
    match bob.wait_for(|e| matches!(e, Event::Msg(_))).await.unwrap() {
        Event::Msg(record) => assert_eq!(record.text, "welcome back"),
        other => panic!("expected msg, got {other:?}"),
    }
}
