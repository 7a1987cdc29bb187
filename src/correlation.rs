//! Correlation ids tying a search request to the interaction events that follow it.
//!
//! `CorrelationIdProvider::obtain` adopts an id round-tripped from the search backend verbatim,
//! or synthesizes a v4 UUID when the backend sent none. Callers that need to join client events
//! with backend-side metrics can check `is_synthesized()` and skip logging.

use rand::{rng, RngCore};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use uuid::Uuid;

/// Where a correlation id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationSource {
    /// Returned by the search backend (response header or field).
    Upstream,
    /// Generated locally; the backend has never seen it.
    Synthesized,
}

/// Opaque id for one logical search request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    value: String,
    source: CorrelationSource,
}

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> CorrelationSource {
        self.source
    }

    pub fn is_synthesized(&self) -> bool {
        self.source == CorrelationSource::Synthesized
    }

    /// Parse as a UUID. Upstream values are adopted unchecked, so this can fail.
    pub fn parse_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.value).ok()
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.value
    }
}

/// Obtain-or-synthesize correlation ids. Stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct CorrelationIdProvider;

impl CorrelationIdProvider {
    pub fn new() -> Self {
        Self
    }

    /// Adopt `header` verbatim, or synthesize a v4 UUID if it is absent or blank.
    pub fn obtain(&self, header: Option<&str>) -> CorrelationId {
        let mut rng = rng();
        self.obtain_with_rng(header, &mut rng)
    }

    /// Same as `obtain` with an explicit random source.
    pub fn obtain_with_rng<R: RngCore>(&self, header: Option<&str>, rng: &mut R) -> CorrelationId {
        match header {
            Some(value) if !value.trim().is_empty() => {
                CorrelationId { value: value.to_owned(), source: CorrelationSource::Upstream }
            }
            _ => {
                let mut bytes = [0u8; 16];
                rng.fill_bytes(&mut bytes);
                let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
                CorrelationId {
                    value: id.hyphenated().to_string(),
                    source: CorrelationSource::Synthesized,
                }
            }
        }
    }
}

/// Bounded, insertion-ordered window of recently logged search ids.
///
/// Used only to flag clicks whose search was never seen locally; false positives are expected
/// once an id ages out of the window.
#[derive(Debug)]
pub struct RecentSearches {
    order: VecDeque<Uuid>,
    members: HashSet<Uuid>,
    capacity: usize,
}

impl RecentSearches {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Remember `id`. Re-recording a known id does not refresh its position.
    pub fn record(&mut self, id: Uuid) {
        if !self.members.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn adopts_upstream_verbatim() {
        let id = CorrelationIdProvider::new().obtain(Some("11111111-1111-1111-1111-111111111111"));
        assert_eq!(id.as_str(), "11111111-1111-1111-1111-111111111111");
        assert_eq!(id.source(), CorrelationSource::Upstream);
        assert!(!id.is_synthesized());
    }

    #[test]
    fn upstream_value_is_not_normalized() {
        let id = CorrelationIdProvider::new().obtain(Some("ABC-not-a-uuid"));
        assert_eq!(id.as_str(), "ABC-not-a-uuid");
        assert!(id.parse_uuid().is_none());
    }

    #[test]
    fn synthesizes_v4_when_absent() {
        let id = CorrelationIdProvider::new().obtain(None);
        assert!(id.is_synthesized());
        let uuid = id.parse_uuid().expect("synthesized id is a uuid");
        assert_eq!(uuid.get_version_num(), 4);
    }

    #[test]
    fn blank_header_counts_as_absent() {
        let provider = CorrelationIdProvider::new();
        assert!(provider.obtain(Some("")).is_synthesized());
        assert!(provider.obtain(Some("   ")).is_synthesized());
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        let provider = CorrelationIdProvider::new();
        let a = provider.obtain_with_rng(None, &mut StdRng::seed_from_u64(1));
        let b = provider.obtain_with_rng(None, &mut StdRng::seed_from_u64(1));
        let c = provider.obtain_with_rng(None, &mut StdRng::seed_from_u64(2));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ids_key_hash_sets_by_value_and_source() {
        use std::collections::HashSet;
        let provider = CorrelationIdProvider::new();
        let upstream = provider.obtain(Some("11111111-1111-1111-1111-111111111111"));
        let mut seen = HashSet::new();
        assert!(seen.insert(upstream.clone()));
        assert!(!seen.insert(upstream));
        assert!(seen.insert(provider.obtain(None)));
        let sources: HashSet<CorrelationSource> = seen.iter().map(|id| id.source()).collect();
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn recent_searches_evicts_oldest() {
        let ids: Vec<Uuid> = (1..=3u128).map(Uuid::from_u128).collect();
        let mut recent = RecentSearches::new(2);
        for id in &ids {
            recent.record(*id);
        }
        assert_eq!(recent.len(), 2);
        assert!(!recent.contains(&ids[0]));
        assert!(recent.contains(&ids[1]));
        assert!(recent.contains(&ids[2]));
    }

    #[test]
    fn recent_searches_ignores_duplicates() {
        let id = Uuid::from_u128(9);
        let mut recent = RecentSearches::new(4);
        recent.record(id);
        recent.record(id);
        assert_eq!(recent.len(), 1);
    }
}
