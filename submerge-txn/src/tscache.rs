// A per-key high-watermark ts (spec §3.3): writes at or below it must
// refresh or restart. Only ever increases.

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct TsCacheEntry(u64);

impl TsCacheEntry {
    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn bump(&mut self, ts: u64) {
        self.0 = self.0.max(ts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_only_increases() {
        let mut c = TsCacheEntry::default();
        c.bump(5);
        c.bump(2);
        assert_eq!(c.get(), 5);
        c.bump(9);
        assert_eq!(c.get(), 9);
    }
}
