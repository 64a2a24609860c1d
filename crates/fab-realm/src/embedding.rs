// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic bag-of-words embeddings.
//!
//! The default vector backend needs no model: tokens hash into a fixed
//! number of dimensions and the counts are L2-normalized. The same text
//! always produces the same vector, which is what makes embedding
//! extraction idempotent under retry.

use sha2::{Digest, Sha256};

/// Dimensionality of deterministic embeddings.
pub const EMBEDDING_DIMS: usize = 64;

/// Embed text deterministically.
#[must_use]
pub fn deterministic_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIMS];
    for token in text.split_whitespace() {
        let token = token.to_lowercase();
        let digest = Sha256::digest(token.as_bytes());
        let index = usize::from(digest[0]) % EMBEDDING_DIMS;
        vector[index] += 1.0;
    }
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}
