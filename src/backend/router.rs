//! Server selection: modula or ketama consistent hashing
//!
//! The ketama ring is libmemcached-compatible: 160 points per unit of weight,
//! four points per MD5 digest of `"<host:port>-<i>"`.

use crate::backend::ServerSpec;
use crate::behavior::{Behavior, BehaviorSet, Distribution};
use crate::error::ReturnCode;
use crate::hash::HashAlgorithm;
use md5::{Digest, Md5};

/// Points per server per unit of weight
const POINTS_PER_SERVER: usize = 160;

/// Maps keys to indices into the server list
#[derive(Clone, Debug)]
pub struct Router {
    hash: HashAlgorithm,
    kind: RouterKind,
}

#[derive(Clone, Debug)]
enum RouterKind {
    Empty,
    Modula { count: usize },
    Ketama(Ring),
}

impl Router {
    /// A router with no servers
    pub fn empty() -> Self {
        Self {
            hash: HashAlgorithm::Default,
            kind: RouterKind::Empty,
        }
    }

    /// Build a router for the servers under the current behaviors
    pub fn build(servers: &[ServerSpec], behaviors: &BehaviorSet) -> Result<Self, ReturnCode> {
        let distribution = behaviors.distribution();
        if !distribution.is_supported() {
            return Err(ReturnCode::NotSupported);
        }

        let hash = if distribution.is_consistent() {
            behaviors.ketama_hash()
        } else {
            behaviors.hash_algorithm()
        };
        if !hash.is_supported() {
            return Err(ReturnCode::NotSupported);
        }

        let kind = if servers.is_empty() {
            RouterKind::Empty
        } else if distribution.is_consistent() {
            let weighted = distribution == Distribution::ConsistentWeighted
                || behaviors.is_set(Behavior::KetamaWeighted);
            let nodes = servers
                .iter()
                .map(|s| (s.address(), if weighted { s.weight.max(1) } else { 1 }));
            RouterKind::Ketama(Ring::build(nodes))
        } else {
            RouterKind::Modula {
                count: servers.len(),
            }
        };

        Ok(Self { hash, kind })
    }

    /// Server index for `key`, `None` when there are no servers
    pub fn route(&self, key: &[u8]) -> Option<usize> {
        let hash = self.hash.hash(key)?;
        match &self.kind {
            RouterKind::Empty => None,
            RouterKind::Modula { count } => Some(hash as usize % count),
            RouterKind::Ketama(ring) => Some(ring.route(hash)),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, RouterKind::Empty)
    }
}

/// Immutable ketama ring of (point, server index) pairs
#[derive(Clone, Debug)]
struct Ring {
    points: Box<[(u32, usize)]>,
}

impl Ring {
    fn build(nodes: impl Iterator<Item = (String, u32)>) -> Self {
        let mut points = Vec::new();

        for (index, (identity, weight)) in nodes.enumerate() {
            let num_points = POINTS_PER_SERVER * weight as usize;
            // Each MD5 digest yields 4 hash points
            for i in 0..num_points / 4 {
                let digest = Md5::digest(format!("{identity}-{i}").as_bytes());
                for chunk in digest.chunks_exact(4) {
                    let point = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    points.push((point, index));
                }
            }
        }

        points.sort_unstable_by_key(|&(point, _)| point);
        Self {
            points: points.into_boxed_slice(),
        }
    }

    fn route(&self, hash: u32) -> usize {
        let idx = self.points.partition_point(|&(point, _)| point < hash);
        let idx = if idx == self.points.len() { 0 } else { idx };
        self.points[idx].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(n: usize) -> Vec<ServerSpec> {
        (0..n).map(|i| ServerSpec::tcp(format!("s{i}"), 11211)).collect()
    }

    fn ketama() -> BehaviorSet {
        let mut behaviors = BehaviorSet::new();
        behaviors.apply(Behavior::Ketama, 1);
        behaviors
    }

    #[test]
    fn test_empty() {
        let router = Router::build(&[], &BehaviorSet::new()).unwrap();
        assert!(router.is_empty());
        assert_eq!(router.route(b"key"), None);
        assert!(Router::empty().is_empty());
    }

    #[test]
    fn test_modula() {
        let router = Router::build(&servers(3), &BehaviorSet::new()).unwrap();
        for i in 0..100 {
            let key = format!("key-{i}");
            let expected = crate::hash::one_at_a_time(key.as_bytes()) as usize % 3;
            assert_eq!(router.route(key.as_bytes()), Some(expected));
        }
    }

    #[test]
    fn test_ketama_single_node() {
        let router = Router::build(&servers(1), &ketama()).unwrap();
        assert_eq!(router.route(b"any-key"), Some(0));
        assert_eq!(router.route(b""), Some(0));
    }

    #[test]
    fn test_ketama_roughly_uniform() {
        let router = Router::build(&servers(3), &ketama()).unwrap();
        let mut counts = [0u32; 3];
        for i in 0..10_000u32 {
            let key = format!("key-{i}");
            counts[router.route(key.as_bytes()).unwrap()] += 1;
        }
        // Each of 3 servers should get 25-45% of 10k keys
        for (i, &count) in counts.iter().enumerate() {
            assert!(
                (2500..=4500).contains(&count),
                "server {i} got {count} keys: {counts:?}"
            );
        }
    }

    #[test]
    fn test_ketama_minimal_remapping() {
        let three = Router::build(&servers(3), &ketama()).unwrap();
        let four = Router::build(&servers(4), &ketama()).unwrap();

        let total = 10_000u32;
        let remapped = (0..total)
            .filter(|i| {
                let key = format!("key-{i}");
                three.route(key.as_bytes()) != four.route(key.as_bytes())
            })
            .count();
        // Ideal: 25% remapped. Allow up to 40%.
        assert!(remapped < 4000, "{remapped} of {total} keys moved");
    }

    #[test]
    fn test_weighted() {
        let mut behaviors = BehaviorSet::new();
        behaviors.apply(Behavior::Distribution, Distribution::ConsistentWeighted.id());

        let mut specs = servers(2);
        specs[1].weight = 2;
        let router = Router::build(&specs, &behaviors).unwrap();

        let mut counts = [0u32; 2];
        for i in 0..10_000u32 {
            let key = format!("key-{i}");
            counts[router.route(key.as_bytes()).unwrap()] += 1;
        }
        let ratio = f64::from(counts[1]) / f64::from(counts[0]);
        assert!((1.5..2.5).contains(&ratio), "ratio {ratio:.2}: {counts:?}");
    }

    #[test]
    fn test_unsupported_hash() {
        let mut behaviors = BehaviorSet::new();
        assert_eq!(
            behaviors.apply(Behavior::Hash, HashAlgorithm::Jenkins.id()),
            ReturnCode::NotSupported
        );
        // Rejected values never reach the router
        assert!(Router::build(&servers(2), &behaviors).is_ok());
    }
}
