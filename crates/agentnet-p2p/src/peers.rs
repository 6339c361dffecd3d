use std::collections::HashSet;
use std::sync::Mutex;

/// Monotonic set of peer addresses we have dialed or been seeded with.
///
/// Only decides *whether* to dial. An address stays known after a failed
/// dial; the next announcement cycle is the retry path.
#[derive(Default)]
pub struct PeerDirectory {
    known: Mutex<HashSet<String>>,
    /// Our own advertised addresses; never dialed.
    own: Mutex<HashSet<String>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_own_addresses(&self, addresses: &[String]) {
        let mut own = self.own.lock().unwrap_or_else(|p| p.into_inner());
        own.clear();
        own.extend(addresses.iter().cloned());
    }

    pub fn knows(&self, address: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(address)
    }

    /// Returns `true` if the address was new.
    pub fn remember(&self, address: &str) -> bool {
        self.known
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(address.to_string())
    }

    /// Addresses from `addresses` that are neither known nor our own,
    /// without marking them.
    pub fn unknown<'a, I>(&self, addresses: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let known = self.known.lock().unwrap_or_else(|p| p.into_inner());
        let own = self.own.lock().unwrap_or_else(|p| p.into_inner());
        let mut seen = HashSet::new();
        addresses
            .into_iter()
            .filter(|a| !known.contains(*a) && !own.contains(*a) && seen.insert(*a))
            .cloned()
            .collect()
    }

    /// Like [`Self::unknown`], but marks each returned address as known in
    /// the same critical section. Concurrent callers can never both claim
    /// the same address, so each one is dialed at most once.
    pub fn claim_unknown<'a, I>(&self, addresses: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut known = self.known.lock().unwrap_or_else(|p| p.into_inner());
        let own = self.own.lock().unwrap_or_else(|p| p.into_inner());
        addresses
            .into_iter()
            .filter(|a| !own.contains(*a) && !a.is_empty())
            .filter(|a| known.insert((*a).clone()))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .known
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.known.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.known.lock().unwrap_or_else(|p| p.into_inner()).clear();
        self.own.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn remember_is_monotonic() {
        let dir = PeerDirectory::new();
        assert!(!dir.knows("/ip4/1.1.1.1/tcp/1"));
        assert!(dir.remember("/ip4/1.1.1.1/tcp/1"));
        assert!(!dir.remember("/ip4/1.1.1.1/tcp/1"));
        assert!(dir.knows("/ip4/1.1.1.1/tcp/1"));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn unknown_filters_known_own_and_duplicates() {
        let dir = PeerDirectory::new();
        dir.remember("a");
        dir.set_own_addresses(&addrs(&["me"]));
        let input = addrs(&["a", "b", "me", "b", "c"]);
        assert_eq!(dir.unknown(&input), addrs(&["b", "c"]));
        assert!(!dir.knows("b"));
    }

    #[test]
    fn claim_hands_out_each_address_once() {
        let dir = PeerDirectory::new();
        let input = addrs(&["x", "y", "x"]);
        assert_eq!(dir.claim_unknown(&input), addrs(&["x", "y"]));
        assert!(dir.claim_unknown(&input).is_empty());
        assert!(dir.knows("x") && dir.knows("y"));
    }

    #[test]
    fn clear_forgets_everything() {
        let dir = PeerDirectory::new();
        dir.remember("a");
        dir.clear();
        assert!(dir.is_empty());
    }
}
