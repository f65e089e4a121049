//! Static set of peers an adapter may exchange datagrams with.

use crate::{Error, PeerId};
use std::{collections::BTreeMap, net::SocketAddr};

/// A known participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer<P> {
    pub id: PeerId,
    pub public_key: P,
    pub address: SocketAddr,
}

/// Maps peer identifiers to their key and address.
#[derive(Clone, Debug)]
pub struct Directory<P> {
    peers: BTreeMap<PeerId, Peer<P>>,
}

impl<P> Default for Directory<P> {
    fn default() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }
}

impl<P> Directory<P> {
    /// Build a directory, rejecting repeated identifiers.
    pub fn new(peers: impl IntoIterator<Item = Peer<P>>) -> Result<Self, Error> {
        let mut directory = Self::default();
        for peer in peers {
            directory.add(peer)?;
        }
        Ok(directory)
    }

    pub fn add(&mut self, peer: Peer<P>) -> Result<(), Error> {
        if self.peers.contains_key(&peer.id) {
            return Err(Error::DuplicatePeer(peer.id));
        }
        self.peers.insert(peer.id, peer);
        Ok(())
    }

    pub fn lookup(&self, id: PeerId) -> Option<&Peer<P>> {
        self.peers.get(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterate over peers in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer<P>> {
        self.peers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: PeerId, port: u16) -> Peer<u8> {
        Peer {
            id,
            public_key: id as u8,
            address: SocketAddr::from(([127, 0, 0, 1], port)),
        }
    }

    #[test]
    fn test_lookup() {
        let directory = Directory::new([peer(1, 3001), peer(2, 3002)]).unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.lookup(2), Some(&peer(2, 3002)));
        assert!(directory.lookup(3).is_none());
        let ids: Vec<_> = directory.iter().map(|peer| peer.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = Directory::new([peer(1, 3001), peer(1, 3002)]);
        assert!(matches!(result, Err(Error::DuplicatePeer(1))));

        let mut directory = Directory::new([peer(1, 3001)]).unwrap();
        assert!(matches!(
            directory.add(peer(1, 3005)),
            Err(Error::DuplicatePeer(1))
        ));
        assert_eq!(directory.lookup(1).unwrap().address.port(), 3001);
    }
}
