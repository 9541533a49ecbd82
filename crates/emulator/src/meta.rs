//! Symbol metadata for resolving program counters to names.
//!
//! Purely informational: used by the info log and the stuck-in-sleep guard,
//! never by the witness.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub start: u32,
    pub size: u32,
}

/// Ordered symbol table, sorted by start address.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub symbols: Vec<Symbol>,
}

/// Compiled address-range check for a single symbol, cheap enough to run
/// every instruction.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolRange {
    start: u32,
    end: u32,
}

impl SymbolRange {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl Metadata {
    /// Resolve an address to the name of the covering symbol.
    pub fn lookup_symbol(&self, addr: u32) -> &str {
        if self.symbols.is_empty() {
            return "!unknown";
        }
        // first symbol starting above addr
        let i = self.symbols.partition_point(|s| s.start <= addr);
        if i == 0 {
            return "!start";
        }
        let sym = &self.symbols[i - 1];
        if sym.start.saturating_add(sym.size) < addr {
            // addr points into a gap between symbols
            return "!gap";
        }
        &sym.name
    }

    /// Compile a range check for the named symbol; matches nothing if the
    /// symbol is absent.
    pub fn symbol_matcher(&self, name: &str) -> SymbolRange {
        for sym in &self.symbols {
            if sym.name == name {
                return SymbolRange {
                    start: sym.start,
                    end: sym.start.saturating_add(sym.size),
                };
            }
        }
        SymbolRange::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Metadata {
        Metadata {
            symbols: vec![
                Symbol {
                    name: "main".to_string(),
                    start: 0x1000,
                    size: 0x100,
                },
                Symbol {
                    name: "runtime.notesleep".to_string(),
                    start: 0x2000,
                    size: 0x40,
                },
            ],
        }
    }

    #[test]
    fn lookup_resolves_symbols_and_sentinels() {
        let meta = meta();
        assert_eq!(meta.lookup_symbol(0x1000), "main");
        assert_eq!(meta.lookup_symbol(0x10ff), "main");
        assert_eq!(meta.lookup_symbol(0x0), "!start");
        assert_eq!(meta.lookup_symbol(0x1800), "!gap");
        assert_eq!(Metadata::default().lookup_symbol(0x1000), "!unknown");
    }

    #[test]
    fn symbol_matcher_bounds() {
        let meta = meta();
        let range = meta.symbol_matcher("runtime.notesleep");
        assert!(!range.contains(0x1fff));
        assert!(range.contains(0x2000));
        assert!(range.contains(0x203f));
        assert!(!range.contains(0x2040));

        let missing = meta.symbol_matcher("nope");
        assert!(!missing.contains(0));
        assert!(!missing.contains(0x2000));
    }
}
