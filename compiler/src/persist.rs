// persist.rs — Snapshot fingerprints and build provenance
//
// A fingerprint is the SHA-256 of an SDFG's canonical snapshot (compact
// JSON; every map in the model is ordered, so equal SDFGs hash equally).
// Used for determinism checks and as a cache key.
//
// Preconditions: none.
// Postconditions: equal SDFGs yield equal fingerprints.
// Failure modes: snapshot encoding failure (E0501).
// Side effects: none.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::diag::{codes, Diagnostic};
use crate::sdfg::Sdfg;

/// SHA-256 digest of a canonical snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Lowercase hex (64 characters).
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn sha256(bytes: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    Fingerprint(hash)
}

/// Compact JSON form of `sdfg`, the input to `fingerprint`.
pub fn canonical_json(sdfg: &Sdfg) -> Result<String, Diagnostic> {
    serde_json::to_string(sdfg).map_err(|e| {
        Diagnostic::usage(codes::E0501, format!("encoding SDFG '{}': {e}", sdfg.name))
    })
}

/// Fingerprint of the SDFG's canonical snapshot.
pub fn fingerprint(sdfg: &Sdfg) -> Result<Fingerprint, Diagnostic> {
    Ok(sha256(canonical_json(sdfg)?.as_bytes()))
}

/// Provenance of one constructed SDFG, for `--emit fingerprint`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub source_hash: Option<Fingerprint>,
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn of(sdfg: &Sdfg) -> Result<Provenance, Diagnostic> {
        Ok(Provenance {
            name: sdfg.name.clone(),
            fingerprint: fingerprint(sdfg)?,
            source_hash: sdfg.source().map(|s| sha256(s.as_bytes())),
            compiler_version: env!("CARGO_PKG_VERSION"),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "name": self.name,
            "fingerprint": self.fingerprint.to_hex(),
            "source_hash": self.source_hash.map(|h| h.to_hex()),
            "compiler_version": self.compiler_version,
        })
        .to_string()
    }
}
