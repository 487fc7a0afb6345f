use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use k256::elliptic_curve::ops::Reduce;
use k256::{FieldBytes, Scalar, U256};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CoreError;
use crate::record::UserRecord;

type HmacSha256 = Hmac<Sha256>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub const MASTER_KEY_BYTES: usize = 32;

/// A per-request secp256k1 scalar. Only its inputs are ever persisted; the
/// scalar itself is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EvaluationSecret(Scalar);

impl EvaluationSecret {
    /// Interprets a 32-byte digest as a big-endian integer reduced modulo
    /// the curve group order. The reduction is a wire-visible choice; see
    /// DESIGN.md.
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        let bytes = FieldBytes::from(*digest);
        Self(<Scalar as Reduce<U256>>::reduce_bytes(&bytes))
    }

    pub(crate) fn scalar(&self) -> Scalar {
        self.0
    }
}

/// Record mutation a derivation requests; applied best-effort before the
/// response leaves the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPatch {
    CreateWithEmail(String),
    CreateWithVersion(u64),
    SetKeyVersion(u64),
}

pub struct DerivationOutcome {
    pub secret: EvaluationSecret,
    pub patch: Option<RecordPatch>,
}

/// Strategy interface for turning persisted key material into an evaluation
/// scalar. One strategy is selected per deployment at startup; derivation is
/// a pure function of `(user_hash, aux, record)` so repeated identical
/// requests always produce identical answers.
pub trait SecretDeriver: Send + Sync {
    fn strategy(&self) -> &'static str;

    fn derive(&self, user_hash: &str, aux: &str, record: Option<&UserRecord>)
        -> DerivationOutcome;
}

/// Keyed-digest strategy: HMAC-SHA256 over `identity || user_hash` with the
/// server master key, where `identity` is the persisted email when one is
/// bound and the request's aux email otherwise.
#[derive(Clone)]
pub struct HmacSecretDeriver {
    mac: HmacSha256,
}

impl HmacSecretDeriver {
    pub fn new(key: &[u8]) -> Result<Self, CoreError> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|err| CoreError::KeyMaterial(err.to_string()))?;
        Ok(Self { mac })
    }
}

impl SecretDeriver for HmacSecretDeriver {
    fn strategy(&self) -> &'static str {
        "hmac"
    }

    fn derive(
        &self,
        user_hash: &str,
        aux: &str,
        record: Option<&UserRecord>,
    ) -> DerivationOutcome {
        let identity = record.and_then(|r| r.email.as_deref()).unwrap_or(aux);

        let mut mac = self.mac.clone();
        mac.update(identity.as_bytes());
        mac.update(user_hash.as_bytes());
        let mut digest: [u8; 32] = mac.finalize().into_bytes().into();

        let secret = EvaluationSecret::from_digest(&digest);
        digest.zeroize();

        let patch = match record {
            None => Some(RecordPatch::CreateWithEmail(aux.to_string())),
            Some(_) => None,
        };
        DerivationOutcome { secret, patch }
    }
}

/// Stream-cipher strategy: an AES-256-CTR keystream keyed by the master key,
/// with IV = first 16 bytes of `SHA-256(user_hash || key_version)`, used
/// directly as the scalar. `aux` carries the requested decimal key version;
/// requesting a version different from the persisted one rotates the user's
/// secret.
pub struct StreamCipherSecretDeriver {
    key: [u8; MASTER_KEY_BYTES],
}

impl StreamCipherSecretDeriver {
    #[must_use]
    pub fn new(key: [u8; MASTER_KEY_BYTES]) -> Self {
        Self { key }
    }
}

impl SecretDeriver for StreamCipherSecretDeriver {
    fn strategy(&self) -> &'static str {
        "stream"
    }

    fn derive(
        &self,
        user_hash: &str,
        aux: &str,
        record: Option<&UserRecord>,
    ) -> DerivationOutcome {
        let persisted = record.and_then(|r| r.key_version);
        // Malformed decimal aux falls back to the persisted version and
        // never mutates the record.
        let requested = aux.trim().parse::<u64>().ok();
        let effective = requested.or(persisted).unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(user_hash.as_bytes());
        hasher.update(effective.to_string().as_bytes());
        let digest = hasher.finalize();
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest[..16]);

        let mut keystream = [0u8; 32];
        let mut cipher = Aes256Ctr::new(&self.key.into(), &iv.into());
        cipher.apply_keystream(&mut keystream);

        let secret = EvaluationSecret::from_digest(&keystream);
        keystream.zeroize();

        let patch = match (record, requested) {
            (None, _) => Some(RecordPatch::CreateWithVersion(effective)),
            (Some(r), Some(req)) if r.key_version.unwrap_or(0) != req => {
                Some(RecordPatch::SetKeyVersion(req))
            }
            _ => None,
        };
        DerivationOutcome { secret, patch }
    }
}
