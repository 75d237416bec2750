//! Interned symbols
//!
//! Selectors and property names are immutable and interned for deduplication,
//! so equality on the dispatch fast path is a pointer comparison.

use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Global symbol intern table
static SYMBOL_TABLE: std::sync::LazyLock<DashMap<u64, Symbol>> =
    std::sync::LazyLock::new(DashMap::new);

/// An interned symbol
#[derive(Clone)]
pub struct Symbol {
    data: Arc<str>,
    hash: u64,
}

impl Symbol {
    /// Intern a string, returning the canonical symbol for it
    pub fn intern(s: &str) -> Symbol {
        let hash = Self::compute_hash(s);

        if let Some(existing) = SYMBOL_TABLE.get(&hash)
            && existing.data.as_ref() == s
        {
            return existing.clone();
        }

        let symbol = Symbol {
            data: Arc::from(s),
            hash,
        };
        SYMBOL_TABLE.insert(hash, symbol.clone());
        symbol
    }

    /// The symbol's text
    pub fn as_str(&self) -> &str {
        &self.data
    }

    fn compute_hash(s: &str) -> u64 {
        let mut hasher = FxHasher::default();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data) || self.data == other.data
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.data)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::intern(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_deduplicates() {
        let a = Symbol::intern("ifTrue:ifFalse:");
        let b = Symbol::intern("ifTrue:ifFalse:");
        assert!(Arc::ptr_eq(&a.data, &b.data));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_symbols() {
        let a = Symbol::intern("value");
        let b = Symbol::intern("value:");
        assert_ne!(a, b);
    }

    #[test]
    fn test_as_str() {
        let s = Symbol::intern("printString");
        assert_eq!(s.as_str(), "printString");
    }
}
