//! # Connected components over phased positions
//!
//! A variant of union-find without the union-by-rank strategy: the node
//! with the smallest position value becomes the representative of its
//! component, so every phase set is named by its leftmost variant. Nodes
//! are indices into a flat parent array and path compression rewrites
//! parent indices in place during find.
use std::collections::{HashMap, HashSet};

use log::info;

use crate::{fragment::Fragment, phaser::SuperReads};

pub struct ComponentFinder {
    /// Sorted ascending, so index order equals value order.
    positions: Vec<i64>,
    index_of: HashMap<i64, usize>,
    parent: Vec<usize>,
}

impl ComponentFinder {
    /// `positions` must be sorted ascending.
    pub fn new(positions: Vec<i64>) -> ComponentFinder {
        let index_of = positions
            .iter()
            .enumerate()
            .map(|(index, &position)| (position, index))
            .collect();
        let parent = (0..positions.len()).collect();

        ComponentFinder {
            positions,
            index_of,
            parent,
        }
    }

    pub fn contains(&self, position: i64) -> bool {
        self.index_of.contains_key(&position)
    }

    /// Merge the components of `x` and `y`; the root holding the smaller
    /// position becomes the parent.
    pub fn merge(&mut self, x: i64, y: i64) {
        let x_root = self.find_root(self.index_of[&x]);
        let y_root = self.find_root(self.index_of[&y]);
        if x_root == y_root {
            return;
        }
        if x_root < y_root {
            self.parent[y_root] = x_root;
        } else {
            self.parent[x_root] = y_root;
        }
    }

    /// The component `position` belongs to, identified by its smallest
    /// member.
    pub fn find(&mut self, position: i64) -> i64 {
        let root = self.find_root(self.index_of[&position]);
        self.positions[root]
    }

    fn find_root(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // compress the path walked above
        let mut cursor = node;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }

        root
    }
}

/// Map every phased position to the smallest position it is connected to
/// through fragment co-occurrence. `fragments` is the full filtered set of
/// the chromosome, not just the coverage slice handed to the phaser.
pub fn find_components(superreads: &SuperReads, fragments: &[Fragment]) -> HashMap<i64, i64> {
    let phased: Vec<i64> = superreads
        .haplotype(0)
        .iter()
        .filter(|entry| entry.allele.is_some())
        .map(|entry| entry.position)
        .collect();

    let mut finder = ComponentFinder::new(phased.clone());
    for fragment in fragments {
        let covered: Vec<i64> = fragment
            .observations
            .iter()
            .map(|obs| obs.position)
            .filter(|position| finder.contains(*position))
            .collect();
        for &position in covered.iter().skip(1) {
            finder.merge(covered[0], position);
        }
    }

    let components: HashMap<i64, i64> = phased
        .iter()
        .map(|&position| (position, finder.find(position)))
        .collect();
    let n_components = components.values().collect::<HashSet<_>>().len();
    info!(
        "Phased {} of {} considered variants in {} components",
        phased.len(),
        superreads.len(),
        n_components
    );

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fragment::Fragment,
        phaser::SuperReadEntry,
        variant::{Allele, AlleleObservation},
    };

    fn fragment(positions: &[i64]) -> Fragment {
        let observations = positions
            .iter()
            .map(|&position| AlleleObservation {
                position,
                base: b'A',
                allele: Allele::Ref,
                quality: 30,
            })
            .collect();
        Fragment::new("read".into(), 60, observations)
    }

    fn superreads(positions: &[i64]) -> SuperReads {
        let entries: Vec<SuperReadEntry> = positions
            .iter()
            .map(|&position| SuperReadEntry {
                position,
                allele: Some(0),
                quality: 1,
            })
            .collect();
        let complement: Vec<SuperReadEntry> = entries
            .iter()
            .map(|e| SuperReadEntry {
                allele: Some(1),
                ..*e
            })
            .collect();
        SuperReads::from_entries([entries, complement])
    }

    #[test]
    fn representative_is_smallest_member() {
        let mut finder = ComponentFinder::new(vec![10, 20, 30, 40]);
        finder.merge(30, 20);
        finder.merge(40, 30);
        assert_eq!(20, finder.find(40));
        assert_eq!(20, finder.find(20));
        assert_eq!(10, finder.find(10));
    }

    #[test]
    fn merge_chains_collapse() {
        let mut finder = ComponentFinder::new(vec![1, 2, 3, 4, 5]);
        finder.merge(1, 2);
        finder.merge(4, 5);
        finder.merge(2, 4);
        for position in [1, 2, 4, 5] {
            assert_eq!(1, finder.find(position));
        }
        assert_eq!(3, finder.find(3));
    }

    #[test]
    fn fragments_connect_positions() {
        let reads = superreads(&[10, 20, 30, 40]);
        let fragments = vec![fragment(&[10, 20]), fragment(&[20, 30])];
        let components = find_components(&reads, &fragments);
        assert_eq!(10, components[&10]);
        assert_eq!(10, components[&20]);
        assert_eq!(10, components[&30]);
        // singleton stays its own representative
        assert_eq!(40, components[&40]);
    }

    #[test]
    fn unphased_entries_are_excluded() {
        let mut reads = superreads(&[10, 20]);
        // mark 20 unphased on both haplotypes
        reads = {
            let mut h0: Vec<SuperReadEntry> = reads.haplotype(0).to_vec();
            let mut h1: Vec<SuperReadEntry> = reads.haplotype(1).to_vec();
            h0[1].allele = None;
            h1[1].allele = None;
            SuperReads::from_entries([h0, h1])
        };
        let components = find_components(&reads, &[fragment(&[10, 20])]);
        assert!(components.contains_key(&10));
        assert!(!components.contains_key(&20));
    }
}
