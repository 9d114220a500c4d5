//! Near-duplicate detection via 64-bit SimHash.
//!
//! Tokens vote on each of the 64 bit positions; similar documents land
//! within a small Hamming distance of each other. The index is a linear
//! scan, which is fine at dataset-crawl sizes; a banded index would be the
//! next step if the run ever holds millions of hashes.

/// Default maximum Hamming distance at which two pages count as duplicates.
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Compute the 64-bit SimHash of a document.
///
/// Tokenization is ASCII-whitespace splitting with lowercasing; each token
/// hashes via `h = h*31 + byte`. Bit `i` of the result is set iff the signed
/// vote counter for that position is positive after +1/-1 voting per token.
pub fn simhash(content: &str) -> u64 {
    if content.is_empty() {
        return 0;
    }

    let mut counts = [0i64; 64];

    for token in content.split_ascii_whitespace() {
        let mut hash: u64 = 0;
        for byte in token.bytes() {
            let b = byte.to_ascii_lowercase();
            hash = hash.wrapping_mul(31).wrapping_add(b as u64);
        }

        for (i, count) in counts.iter_mut().enumerate() {
            if (hash >> i) & 1 == 1 {
                *count += 1;
            } else {
                *count -= 1;
            }
        }
    }

    let mut result: u64 = 0;
    for (i, count) in counts.iter().enumerate() {
        if *count > 0 {
            result |= 1 << i;
        }
    }
    result
}

/// Number of differing bit positions between two hashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// In-run index of observed SimHashes.
#[derive(Debug)]
pub struct Deduper {
    hashes: Vec<u64>,
    threshold: u32,
    duplicates_detected: u64,
}

impl Deduper {
    pub fn new(threshold: u32) -> Self {
        Self {
            hashes: Vec::new(),
            threshold,
            duplicates_detected: 0,
        }
    }

    /// Check a hash against every stored hash. Duplicates are counted and
    /// not stored; new hashes are stored.
    pub fn is_duplicate(&mut self, hash: u64) -> bool {
        for stored in &self.hashes {
            if hamming_distance(hash, *stored) <= self.threshold {
                self.duplicates_detected += 1;
                return true;
            }
        }
        self.hashes.push(hash);
        false
    }

    pub fn duplicates_detected(&self) -> u64 {
        self.duplicates_detected
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl Default for Deduper {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simhash_deterministic() {
        let text = "the quick brown fox jumps over the lazy dog";
        assert_eq!(simhash(text), simhash(text));
        assert_eq!(hamming_distance(simhash(text), simhash(text)), 0);
    }

    #[test]
    fn test_simhash_case_insensitive_tokens() {
        assert_eq!(simhash("Hello World"), simhash("hello world"));
    }

    #[test]
    fn test_simhash_empty() {
        assert_eq!(simhash(""), 0);
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0, 0), 0);
        assert_eq!(hamming_distance(0b1011, 0b0010), 2);
        assert_eq!(hamming_distance(u64::MAX, 0), 64);
    }

    #[test]
    fn test_near_identical_documents_collide() {
        // Two bodies differing by one token out of a thousand must land
        // within the default threshold.
        let base: Vec<String> = (0..1000).map(|i| format!("token{}", i)).collect();
        let doc_a = base.join(" ");

        let mut modified = base.clone();
        modified[500] = "changed".to_string();
        let doc_b = modified.join(" ");

        let distance = hamming_distance(simhash(&doc_a), simhash(&doc_b));
        assert!(distance <= DEFAULT_THRESHOLD, "distance was {}", distance);

        let mut deduper = Deduper::default();
        assert!(!deduper.is_duplicate(simhash(&doc_a)));
        assert!(deduper.is_duplicate(simhash(&doc_b)));
        assert_eq!(deduper.duplicates_detected(), 1);
    }

    #[test]
    fn test_distinct_documents_do_not_collide() {
        let doc_a = "alpha beta gamma delta epsilon zeta eta theta";
        let doc_b = "one two three four five six seven eight nine ten";

        let mut deduper = Deduper::default();
        assert!(!deduper.is_duplicate(simhash(doc_a)));
        assert!(!deduper.is_duplicate(simhash(doc_b)));
        assert_eq!(deduper.len(), 2);
        assert_eq!(deduper.duplicates_detected(), 0);
    }

    #[test]
    fn test_duplicate_not_stored() {
        let doc = "same same same content here";
        let mut deduper = Deduper::default();
        assert!(!deduper.is_duplicate(simhash(doc)));
        assert!(deduper.is_duplicate(simhash(doc)));
        assert!(deduper.is_duplicate(simhash(doc)));
        assert_eq!(deduper.len(), 1);
        assert_eq!(deduper.duplicates_detected(), 2);
    }
}
