//! 4 KiB memory pages with a cached Merkle subtree.
//!
//! A page covers 4096 bytes of guest memory and doubles as the bottom seven
//! levels of the global memory Merkle tree: 128 leaves of 32 bytes each,
//! hashed pairwise up to a single page root. Internal nodes are cached and
//! invalidated leaf-up on every write, so repeated root computations between
//! writes are free.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::keccak256;

/// Number of address bits covered by one page.
pub const PAGE_ADDR_SIZE: usize = 12;
/// Page size in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_ADDR_SIZE;
/// Mask selecting the in-page part of an address.
pub const PAGE_ADDR_MASK: u32 = (PAGE_SIZE - 1) as u32;
/// Number of address bits selecting the page.
pub const PAGE_KEY_SIZE: usize = 32 - PAGE_ADDR_SIZE;
/// Mask selecting the page key from a shifted address.
pub const PAGE_KEY_MASK: u32 = ((1u64 << PAGE_KEY_SIZE) - 1) as u32;

/// 32-byte Merkle leaves per page.
pub(crate) const PAGE_LEAVES: usize = PAGE_SIZE / 32;

/// Keccak-256 of the concatenation of two nodes.
pub(crate) fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    keccak256(&buf)
}

/// Raw page data. Serialized as a hex string in the JSON state.
#[derive(Clone)]
pub struct Page(pub [u8; PAGE_SIZE]);

impl Default for Page {
    fn default() -> Self {
        Page([0u8; PAGE_SIZE])
    }
}

impl Serialize for Page {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Page {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PageVisitor;

        impl<'de> Visitor<'de> for PageVisitor {
            type Value = Page;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a {} character hex string", PAGE_SIZE * 2)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Page, E> {
                let bytes = hex::decode(v).map_err(de::Error::custom)?;
                let data: [u8; PAGE_SIZE] = bytes
                    .try_into()
                    .map_err(|b: Vec<u8>| de::Error::invalid_length(b.len(), &self))?;
                Ok(Page(data))
            }
        }

        deserializer.deserialize_str(PageVisitor)
    }
}

/// A page plus the cache of its internal Merkle nodes.
///
/// `cache[1]` is the page root; `cache[64..128]` are the parents of the raw
/// 32-byte leaves. Index 0 is unused, matching generalized-index addressing.
#[derive(Clone)]
pub struct CachedPage {
    pub data: Page,
    cache: [[u8; 32]; PAGE_LEAVES],
    valid: [bool; PAGE_LEAVES],
}

impl Default for CachedPage {
    fn default() -> Self {
        Self {
            data: Page::default(),
            cache: [[0u8; 32]; PAGE_LEAVES],
            valid: [false; PAGE_LEAVES],
        }
    }
}

impl CachedPage {
    pub fn new(data: Page) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// True if the cached page root is still current.
    pub fn root_valid(&self) -> bool {
        self.valid[1]
    }

    /// Drop cached nodes on the path from the written address to the page root.
    pub fn invalidate(&mut self, page_addr: u32) {
        debug_assert!(page_addr < PAGE_SIZE as u32);
        // start at the parent of the touched 32-byte leaf
        let mut k = ((1usize << PAGE_ADDR_SIZE) | page_addr as usize) >> 6;
        while k > 0 {
            self.valid[k] = false;
            k >>= 1;
        }
    }

    /// Compute (and cache) the page root.
    pub fn merkle_root(&mut self) -> [u8; 32] {
        // leaf layer: parents of the raw 32-byte chunks
        for i in (0..PAGE_SIZE).step_by(64) {
            let j = PAGE_LEAVES / 2 + i / 64;
            if self.valid[j] {
                continue;
            }
            let mut left = [0u8; 32];
            let mut right = [0u8; 32];
            left.copy_from_slice(&self.data.0[i..i + 32]);
            right.copy_from_slice(&self.data.0[i + 32..i + 64]);
            self.cache[j] = hash_pair(&left, &right);
            self.valid[j] = true;
        }
        // internal layers, children first
        for j in (1..PAGE_LEAVES / 2).rev() {
            if self.valid[j] {
                continue;
            }
            self.cache[j] = hash_pair(&self.cache[2 * j], &self.cache[2 * j + 1]);
            self.valid[j] = true;
        }
        self.cache[1]
    }

    /// Node at `gindex` within the page subtree (1 = page root,
    /// 128..255 = raw 32-byte leaves).
    pub fn merkleize_subtree(&mut self, gindex: usize) -> [u8; 32] {
        let _ = self.merkle_root(); // fill the cache
        debug_assert!(gindex > 0 && gindex < PAGE_LEAVES * 2);
        if gindex >= PAGE_LEAVES {
            let offset = (gindex - PAGE_LEAVES) * 32;
            let mut leaf = [0u8; 32];
            leaf.copy_from_slice(&self.data.0[offset..offset + 32]);
            return leaf;
        }
        self.cache[gindex]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_root_is_zero_subtree() {
        let mut expect = [0u8; 32];
        for _ in 0..(PAGE_ADDR_SIZE - 5) {
            expect = hash_pair(&expect, &expect);
        }
        let mut page = CachedPage::default();
        assert_eq!(page.merkle_root(), expect);
    }

    #[test]
    fn write_invalidates_path_to_root() {
        let mut page = CachedPage::default();
        let empty_root = page.merkle_root();
        assert!(page.root_valid());

        page.data.0[42] = 0xab;
        page.invalidate(42);
        assert!(!page.root_valid());
        let dirty_root = page.merkle_root();
        assert_ne!(dirty_root, empty_root);

        // reverting the write restores the original root
        page.data.0[42] = 0;
        page.invalidate(42);
        assert_eq!(page.merkle_root(), empty_root);
    }

    #[test]
    fn subtree_leaves_match_data() {
        let mut page = CachedPage::default();
        page.data.0[0] = 1;
        page.invalidate(0);
        let leaf = page.merkleize_subtree(PAGE_LEAVES);
        assert_eq!(leaf[0], 1);
        assert_eq!(&leaf[1..], &[0u8; 31][..]);
    }
}
