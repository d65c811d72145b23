//! Shared byte buffers and their content identity.
//!
//! Buffers hold constant tensor data and out-of-band metadata payloads.
//! They are the only multi-owner objects in the IR: several tensors may
//! point at one buffer when their constant content is identical, which
//! shrinks the serialized artifact. Content is treated as immutable once
//! a buffer has more than one owner, so deduplication stays sound.
//! A buffer whose owner list is empty is dead and gets pruned before
//! encoding.

use super::{MetadataId, TensorId};

/// Back-reference from a buffer to one of its owners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferOwner {
    Tensor(TensorId),
    Metadata(MetadataId),
}

#[derive(Clone, Debug)]
pub struct Buffer {
    data: Vec<u8>,
    pub(super) owners: Vec<BufferOwner>,
}

impl Buffer {
    pub(super) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            owners: Vec::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn owners(&self) -> &[BufferOwner] {
        &self.owners
    }

    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of(&self.data)
    }
}

/// A 256-bit BLAKE3 content hash, used as the identity of buffer payloads
/// during deduplication.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Display as short base-32 (8 characters, 40 bits).
    pub fn to_short(&self) -> String {
        const ALPHABET: &[u8] = b"0123456789abcdefghjkmnpqrstuvwxyz";
        let val = u64::from_be_bytes([
            0, 0, 0, self.0[0], self.0[1], self.0[2], self.0[3], self.0[4],
        ]);
        let mut result = String::with_capacity(8);
        for i in (0..8).rev() {
            let idx = ((val >> (i * 5)) & 0x1F) as usize;
            result.push(ALPHABET[idx] as char);
        }
        result
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_identical_hash() {
        assert_eq!(ContentHash::of(b"weights"), ContentHash::of(b"weights"));
        assert_ne!(ContentHash::of(b"weights"), ContentHash::of(b"weightz"));
    }

    #[test]
    fn short_form_is_eight_chars() {
        assert_eq!(ContentHash::of(b"").to_short().len(), 8);
    }
}
