//! Bridges the bloom filter crate into the index writer as an external
//! collaborator: it simply consumes keys during ingest and, on `finish`,
//! serializes a blob the writer appends to a separate filter file.

use bloom::BloomFilter;

use crate::error::Result;

/// External collaborator that observes every key written to a table and
/// produces a serialized filter blob on `finish`.
pub trait BloomSink {
    /// Records a key observed during ingest.
    fn put(&mut self, key: &[u8]);

    /// Serializes the filter's final state.
    fn finish(&self) -> Result<Vec<u8>>;
}

impl BloomSink for BloomFilter {
    fn put(&mut self, key: &[u8]) {
        self.insert(key);
    }

    fn finish(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_finish_round_trips_through_bloom_crate() {
        let mut filter = BloomFilter::new(100, 0.01);
        filter.put(b"alpha");
        filter.put(b"beta");
        let blob = filter.finish().unwrap();

        let mut cursor = &blob[..];
        let decoded = BloomFilter::read_from(&mut cursor).unwrap();
        assert!(decoded.may_contain(b"alpha"));
        assert!(decoded.may_contain(b"beta"));
    }
}
