/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide three categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **Identity Signatures**: Ed25519, provided by the [`ed25519_dalek`] crate. Used for vote
//!    confirmation signatures, bridge co-signatures and re-propose signatures.
//! 3. **Aggregatable Signatures**: BLS12-381 (minimal-pubkey-size variant), provided by the [`blst`]
//!    crate. Used for partial vote signatures and their aggregation.

use std::fmt::{self, Display, Formatter};

use blst::BLST_ERROR;
use rand_core::{CryptoRng, RngCore};

use super::{
    committee::ValidatorKey,
    data_types::{BlsPublicKeyBytes, BlsSignatureBytes, CryptoHash, SignatureBytes, ValidatorID},
};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use blst::min_pk::{
    AggregatePublicKey as BlsAggregatePublicKey, AggregateSignature as BlsAggregateSignature,
    PublicKey as BlsPublicKey, SecretKey as BlsSecretKey, Signature as BlsSignature,
};
pub use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Domain separation tag of partial signatures in `Vote`-phase votes.
pub const VOTE_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_TIMESLOT_BFT_VOTE_";

/// Domain separation tag of partial signatures in `PreVote`-phase votes.
pub const PREVOTE_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_TIMESLOT_BFT_PREVOTE_";

/// Compute the SHA-256 digest of the concatenation of `parts`.
pub fn hash_parts(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// Data types that contain: 1. A message, and 2. An Ed25519 signature over said message whose
/// correctness can be verified against the signer's [`ValidatorID`].
pub(crate) trait SignedMessage {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Verify that `signature_bytes` is a signature created by `signer` over `message_bytes`.
    fn is_correct(&self, signer: &ValidatorID) -> bool {
        verify_signature(signer, &self.message_bytes(), &self.signature_bytes())
    }
}

/// Verify that `signature` is an Ed25519 signature by `signer` over `message`. Returns `false` if
/// `signer` is not a valid Ed25519 point.
pub fn verify_signature(signer: &ValidatorID, message: &[u8], signature: &SignatureBytes) -> bool {
    match VerifyingKey::from_bytes(&signer.bytes()) {
        Ok(verifying_key) => verifying_key
            .verify(message, &Signature::from_bytes(&signature.bytes()))
            .is_ok(),
        Err(_) => false,
    }
}

/// Verify that `signature` is a BLS signature by `public_key` over `message` under the domain
/// separation tag `dst`. Malformed keys or signatures verify as `false`.
pub fn bls_verify(
    public_key: &BlsPublicKeyBytes,
    message: &[u8],
    dst: &[u8],
    signature: &BlsSignatureBytes,
) -> bool {
    let (Ok(public_key), Ok(signature)) = (
        BlsPublicKey::from_bytes(&public_key.bytes()),
        BlsSignature::from_bytes(&signature.bytes()),
    ) else {
        return false;
    };
    signature.verify(true, message, dst, &[], &public_key, true) == BLST_ERROR::BLST_SUCCESS
}

/// The pair of secret keys a validator signs consensus messages with.
///
/// A node may control several `ConsensusKeypair`s (one per committee seat), see
/// [`Configuration::keys`](crate::config::Configuration::keys).
#[derive(Clone)]
pub struct ConsensusKeypair {
    identity: SigningKey,
    bls: BlsSecretKey,
}

impl ConsensusKeypair {
    pub fn new(identity: SigningKey, bls: BlsSecretKey) -> Self {
        Self { identity, bls }
    }

    /// Generate a fresh keypair. The BLS secret key is derived from 32 bytes of input key material
    /// drawn from `rng`.
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Result<Self, KeyGenerationError> {
        let identity = SigningKey::generate(rng);
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        let bls = BlsSecretKey::key_gen(&ikm, &[]).map_err(KeyGenerationError)?;
        Ok(Self { identity, bls })
    }

    pub fn id(&self) -> ValidatorID {
        ValidatorID::new(self.identity.verifying_key().to_bytes())
    }

    pub fn bls_public_key(&self) -> BlsPublicKeyBytes {
        BlsPublicKeyBytes::new(self.bls.sk_to_pk().to_bytes())
    }

    /// The public half of this keypair, as it appears in a [`Committee`](super::committee::Committee).
    pub fn validator_key(&self) -> ValidatorKey {
        ValidatorKey::new(self.id(), self.bls_public_key())
    }

    /// Sign an arbitrary `message` with the Ed25519 identity key.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.identity.sign(message).to_bytes())
    }

    /// Sign an arbitrary `message` with the BLS key under the domain separation tag `dst`.
    pub fn bls_sign(&self, message: &[u8], dst: &[u8]) -> BlsSignatureBytes {
        BlsSignatureBytes::new(self.bls.sign(message, dst, &[]).to_bytes())
    }
}

/// `blst` rejected the input key material while deriving a BLS secret key.
#[derive(Debug)]
pub struct KeyGenerationError(pub BLST_ERROR);

impl Display for KeyGenerationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "failed to derive BLS secret key: {:?}", self.0)
    }
}

impl std::error::Error for KeyGenerationError {}
