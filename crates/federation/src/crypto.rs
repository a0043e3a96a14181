//! Cross-instance signature verification, grounded in
//! `packages/gate/src/crypto_agility.rs`'s `CryptoProvider` (real
//! Ed25519 via `ed25519-dalek`, base64-encoded key/signature material,
//! the same `CryptoError` shape). ECDSA-P256 is added via `p256`
//! (RustCrypto sibling of `sha2`/`hmac`, already in the workspace) to
//! give the handshake a second algorithm family so cross-algorithm
//! verification has something real to reject (spec §4.4).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use p256::ecdsa::{signature::Signer as P256Signer, signature::Verifier as P256Verifier, Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CryptoError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed key material: {0}")]
    MalformedKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("algorithm mismatch: key is {key_alg}, signature claims {sig_alg}")]
    AlgorithmMismatch { key_alg: String, sig_alg: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    Ed25519,
    EcdsaP256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ed25519 => "ed25519",
            Algorithm::EcdsaP256 => "ecdsa-p256",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub algorithm: Algorithm,
    pub public_key_b64: String,
    #[serde(skip_serializing)]
    private_key_b64: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub algorithm: Algorithm,
    pub signature_b64: String,
}

/// Generates a fresh keypair for `algorithm`.
pub fn generate_keypair(algorithm: Algorithm) -> KeyPair {
    match algorithm {
        Algorithm::Ed25519 => {
            let signing_key = SigningKey::generate(&mut OsRng);
            KeyPair {
                algorithm,
                public_key_b64: B64.encode(signing_key.verifying_key().to_bytes()),
                private_key_b64: B64.encode(signing_key.to_bytes()),
            }
        }
        Algorithm::EcdsaP256 => {
            let signing_key = P256SigningKey::random(&mut OsRng);
            let verifying_key = P256VerifyingKey::from(&signing_key);
            KeyPair {
                algorithm,
                public_key_b64: B64.encode(verifying_key.to_encoded_point(true).as_bytes()),
                private_key_b64: B64.encode(signing_key.to_bytes()),
            }
        }
    }
}

/// Signs `message` with the keypair's private key.
pub fn sign(keypair: &KeyPair, message: &[u8]) -> Result<Signature, CryptoError> {
    let raw = B64
        .decode(&keypair.private_key_b64)
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;

    let signature_b64 = match keypair.algorithm {
        Algorithm::Ed25519 => {
            let bytes: [u8; 32] = raw
                .try_into()
                .map_err(|_| CryptoError::MalformedKey("expected 32-byte ed25519 seed".into()))?;
            let signing_key = SigningKey::from_bytes(&bytes);
            B64.encode(signing_key.sign(message).to_bytes())
        }
        Algorithm::EcdsaP256 => {
            let signing_key = P256SigningKey::from_slice(&raw)
                .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            let signature: P256Signature = signing_key.sign(message);
            B64.encode(signature.to_der().as_bytes())
        }
    };

    Ok(Signature {
        algorithm: keypair.algorithm,
        signature_b64,
    })
}

/// Verifies `signature` over `message` against `public_key_b64`.
/// Rejects if the signature's algorithm does not match the key's
/// declared algorithm, rather than trying every known scheme.
pub fn verify(
    public_key_b64: &str,
    key_algorithm: Algorithm,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CryptoError> {
    if signature.algorithm != key_algorithm {
        return Err(CryptoError::AlgorithmMismatch {
            key_alg: key_algorithm.as_str().to_string(),
            sig_alg: signature.algorithm.as_str().to_string(),
        });
    }

    let key_bytes = B64
        .decode(public_key_b64)
        .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
    let sig_bytes = B64
        .decode(&signature.signature_b64)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;

    match key_algorithm {
        Algorithm::Ed25519 => {
            let key_arr: [u8; 32] = key_bytes
                .try_into()
                .map_err(|_| CryptoError::MalformedKey("expected 32-byte ed25519 public key".into()))?;
            let verifying_key = VerifyingKey::from_bytes(&key_arr)
                .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            let sig_arr: [u8; 64] = sig_bytes
                .try_into()
                .map_err(|_| CryptoError::MalformedSignature("expected 64-byte ed25519 signature".into()))?;
            let signature = Ed25519Signature::from_bytes(&sig_arr);
            verifying_key
                .verify(message, &signature)
                .map_err(|_| CryptoError::VerificationFailed)
        }
        Algorithm::EcdsaP256 => {
            let verifying_key = P256VerifyingKey::from_sec1_bytes(&key_bytes)
                .map_err(|e| CryptoError::MalformedKey(e.to_string()))?;
            let signature = P256Signature::from_der(&sig_bytes)
                .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
            verifying_key
                .verify(message, &signature)
                .map_err(|_| CryptoError::VerificationFailed)
        }
    }
}
