use crate::codec::Symbol;

/// Position-wise comparison of a stream before and after a channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolErrorStats {
    /// Number of symbols in the original stream.
    pub compared: usize,
    /// `(position, original, mutated)` for every differing position.
    pub changed: Vec<(usize, Symbol, Symbol)>,
}

impl SymbolErrorStats {
    pub fn compare(original: &[Symbol], mutated: &[Symbol]) -> Self {
        let changed = original
            .iter()
            .zip(mutated)
            .enumerate()
            .filter(|(_, (before, after))| before != after)
            .map(|(i, (before, after))| (i, *before, *after))
            .collect();
        Self {
            compared: original.len(),
            changed,
        }
    }

    pub fn error_count(&self) -> usize {
        self.changed.len()
    }

    /// Percentage of changed positions; 0 for an empty stream.
    pub fn error_percent(&self) -> f64 {
        if self.compared == 0 {
            return 0.0;
        }
        self.changed.len() as f64 * 100.0 / self.compared as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_changed_positions() {
        let stats = SymbolErrorStats::compare(&[0, 1, 2, 3], &[0, 2, 2, 0]);
        assert_eq!(stats.changed, vec![(1, 1, 2), (3, 3, 0)]);
        assert_eq!(stats.error_percent(), 50.0);
    }

    #[test]
    fn empty_stream_has_no_errors() {
        let stats = SymbolErrorStats::compare(&[], &[]);
        assert_eq!(stats.error_count(), 0);
        assert_eq!(stats.error_percent(), 0.0);
    }
}
