use crate::outbound::Outbound;
use dashmap::DashMap;
use relaychat::protocol::Message;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Which side opened the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// We dialed the peer (peer connector).
    Outbound,
    /// The peer dialed us and sent `hello`.
    Inbound,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDirection::Outbound => write!(f, "outbound"),
            LinkDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Identifies one registration in the [`PeerTable`], so a handler only ever
/// removes its own entry and not one that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkId(u64);

struct PeerLink {
    id: LinkId,
    direction: LinkDirection,
    outbound: Outbound<Message>,
}

/// Live links to other nodes: peer id → outbound queue.
///
/// Uses `DashMap` so relay fan-out from many sessions does not contend on a
/// single lock. At most one link per peer id; a later handshake replaces the
/// entry.
#[derive(Default)]
pub struct PeerTable {
    links: DashMap<String, PeerLink>,
    next_id: AtomicU64,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a link for `peer_id`, replacing any existing one (last writer wins).
    pub fn register(
        &self,
        peer_id: &str,
        direction: LinkDirection,
        outbound: Outbound<Message>,
    ) -> LinkId {
        let id = LinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let previous = self.links.insert(
            peer_id.to_string(),
            PeerLink {
                id,
                direction,
                outbound,
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                peer = %peer_id,
                old = %previous.direction,
                new = %direction,
                "peer link replaced"
            );
        }
        id
    }

    /// Remove `peer_id` if its entry is still `link`.
    pub fn unregister(&self, peer_id: &str, link: LinkId) -> bool {
        self.links.remove_if(peer_id, |_, l| l.id == link).is_some()
    }

    /// Queue `packet` on every link. A link that rejects it is removed and
    /// closed; the rest still get the packet. Returns the number of links
    /// the packet was queued on.
    pub fn broadcast_all(&self, packet: &Message) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.links.iter() {
            match entry.outbound.try_send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(peer = %entry.key(), err = %e, "dropping peer link");
                    dead.push((entry.key().clone(), entry.id));
                }
            }
        }

        for (peer_id, link) in dead {
            if let Some((_, l)) = self.links.remove_if(&peer_id, |_, l| l.id == link) {
                l.outbound.close();
            }
        }
        delivered
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.links.contains_key(peer_id)
    }

    pub fn direction(&self, peer_id: &str) -> Option<LinkDirection> {
        self.links.get(peer_id).map(|l| l.direction)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Connected peer ids, sorted.
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::spawn_writer;
    use tokio::net::{TcpListener, TcpStream};

    async fn link(capacity: usize) -> (Outbound<Message>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let (_r, w) = client.unwrap().into_split();
        (spawn_writer(w, capacity), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn later_handshake_replaces_entry() {
        let table = PeerTable::new();
        let (out1, _k1) = link(4).await;
        let (out2, _k2) = link(4).await;

        let first = table.register("B", LinkDirection::Outbound, out1);
        let second = table.register("B", LinkDirection::Inbound, out2);
        assert_ne!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.direction("B"), Some(LinkDirection::Inbound));

        // The stale handler's cleanup must not evict the replacement.
        assert!(!table.unregister("B", first));
        assert!(table.contains("B"));
        assert!(table.unregister("B", second));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn broadcast_isolates_failing_link() {
        let table = PeerTable::new();
        let (healthy, _kh) = link(8).await;
        let (broken, _kb) = link(1).await;
        table.register("B", LinkDirection::Outbound, healthy);
        table.register("C", LinkDirection::Outbound, broken);

        let packet = Message::Quit;
        // C's single slot fills on the first pass and the writer never gets
        // to run in between, so the second pass drops it.
        assert_eq!(table.broadcast_all(&packet), 2);
        assert_eq!(table.broadcast_all(&packet), 1);
        assert_eq!(table.peer_ids(), vec!["B".to_string()]);
        assert_eq!(table.broadcast_all(&packet), 1);
    }
}
