//! Message selection and duplicate suppression
//!
//! A [`FilterChain`] holds an ordered list of predicates and passes a
//! message only when every one matches; an empty chain passes
//! everything. The [`DigestWindow`] suppresses the duplicate copy of
//! a message whose packet straddles two sample blocks and is found in
//! both.

use std::collections::{HashMap, HashSet};

use crate::message::{Digest, Message};

/// A message predicate
pub trait MessageFilter {
    /// Does the message pass this filter?
    fn matches(&mut self, msg: &Message) -> bool;
}

/// An AND-chain of message filters
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn MessageFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the chain
    pub fn add(&mut self, filter: Box<dyn MessageFilter>) {
        self.filters.push(filter);
    }

    /// Does the message pass every filter?
    ///
    /// An empty chain matches everything.
    pub fn matches(&mut self, msg: &Message) -> bool {
        self.filters.iter_mut().all(|f| f.matches(msg))
    }
}

/// Passes messages whose meter id is in the set
pub struct MeterIdFilter {
    ids: HashSet<u32>,
}

impl MeterIdFilter {
    pub fn new(ids: HashSet<u32>) -> Self {
        Self { ids }
    }
}

impl MessageFilter for MeterIdFilter {
    fn matches(&mut self, msg: &Message) -> bool {
        self.ids.contains(&msg.meter_id())
    }
}

/// Passes messages whose meter type is in the set
pub struct MeterTypeFilter {
    types: HashSet<u8>,
}

impl MeterTypeFilter {
    pub fn new(types: HashSet<u8>) -> Self {
        Self { types }
    }
}

impl MessageFilter for MeterTypeFilter {
    fn matches(&mut self, msg: &Message) -> bool {
        self.types.contains(&msg.meter_type())
    }
}

/// Suppresses repeated identical transmissions from each meter
///
/// Meters re-broadcast the same reading many times. This filter
/// passes a message only when its checksum differs from the last one
/// seen for the same meter id.
#[derive(Default)]
pub struct UniqueFilter {
    last: HashMap<u32, Vec<u8>>,
}

impl UniqueFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageFilter for UniqueFilter {
    fn matches(&mut self, msg: &Message) -> bool {
        let checksum = msg.checksum();
        match self.last.insert(msg.meter_id(), checksum.clone()) {
            Some(previous) => previous != checksum,
            None => true,
        }
    }
}

/// Cross-block duplicate suppression
///
/// A packet that straddles the junction of two sample blocks is
/// decoded from both. The window keeps the digests of the previous
/// block; [`check`](DigestWindow::check) drops a message already seen
/// there. Both sets are reused, never reallocated.
#[derive(Default)]
pub struct DigestWindow {
    previous: HashSet<Digest>,
    current: HashSet<Digest>,
}

impl DigestWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the message for this block; false when it is a duplicate
    /// from the previous block
    pub fn check(&mut self, msg: &Message) -> bool {
        let digest = Digest::from(msg);
        if self.previous.contains(&digest) {
            return false;
        }
        self.current.insert(digest);
        true
    }

    /// Finish the current block
    pub fn advance(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.current);
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::scm::Scm;

    fn scm(id: u32, typ: u8, checksum: u16) -> Message {
        Message::Scm(Scm {
            id,
            typ,
            tamper_phy: 0,
            tamper_enc: 0,
            consumption: 1,
            checksum,
        })
    }

    #[test]
    fn test_empty_chain_passes() {
        let mut chain = FilterChain::new();
        assert!(chain.matches(&scm(1, 4, 0)));
    }

    #[test]
    fn test_id_filter() {
        let mut f = MeterIdFilter::new([5, 7].into());
        assert!(f.matches(&scm(5, 4, 0)));
        assert!(f.matches(&scm(7, 4, 0)));
        assert!(!f.matches(&scm(6, 4, 0)));
    }

    #[test]
    fn test_type_filter() {
        let mut f = MeterTypeFilter::new([12].into());
        assert!(f.matches(&scm(1, 12, 0)));
        assert!(!f.matches(&scm(1, 4, 0)));
    }

    #[test]
    fn test_chain_is_conjunction() {
        let mut chain = FilterChain::new();
        chain.add(Box::new(MeterIdFilter::new([5].into())));
        chain.add(Box::new(MeterTypeFilter::new([4].into())));

        assert!(chain.matches(&scm(5, 4, 0)));
        assert!(!chain.matches(&scm(5, 3, 0)));
        assert!(!chain.matches(&scm(6, 4, 0)));
    }

    #[test]
    fn test_unique_filter() {
        let mut f = UniqueFilter::new();
        assert!(f.matches(&scm(1, 4, 0xAAAA)));
        assert!(!f.matches(&scm(1, 4, 0xAAAA)));
        assert!(f.matches(&scm(1, 4, 0xBBBB)));
        // a different meter has its own history
        assert!(f.matches(&scm(2, 4, 0xBBBB)));
        // back to the previous reading counts as a change
        assert!(f.matches(&scm(1, 4, 0xAAAA)));
    }

    #[test]
    fn test_digest_window() {
        let mut w = DigestWindow::new();
        let msg = scm(1, 4, 0x1234);

        assert!(w.check(&msg));
        w.advance();

        // found again in the next block: suppressed
        assert!(!w.check(&msg));
        w.advance();

        // absent for one block, then re-transmitted: passes again
        w.advance();
        assert!(w.check(&msg));
    }

    #[test]
    fn test_digest_window_same_block_not_suppressed() {
        let mut w = DigestWindow::new();
        let msg = scm(1, 4, 0x1234);
        assert!(w.check(&msg));
        assert!(w.check(&msg));
    }
}
