//! View-account key material.
//!
//! The view account is a secondary secp256k1 keypair, delegated by the
//! primary wallet, used for TES decryption and session authentication. At
//! rest the private key and the delegation signature exist only as AES-GCM
//! ciphertexts under a password-derived key; in memory they are held
//! unencrypted only after an explicit derive or unlock. A wrong password is
//! observable exactly once, as an authentication-tag mismatch.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use tracing::info;

use crate::error::{Result, SdkError};
use crate::kv::LedgerDb;

/// Protocol tag baked into the keypair derivation and the delegation
/// message. Changing it invalidates every existing view account.
pub const PROTOCOL_TAG: &str = "veilnote";

const KEYSTORE_DOMAIN: &[u8] = b"veilnote.keystore.v1:";
const GCM_TAG_LEN: usize = 16;
const GCM_IV_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Capability boundary to the primary wallet: it can sign arbitrary typed
/// data and plain messages, nothing else is assumed about it.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Address of the primary account, `0x`-prefixed.
    fn address(&self) -> String;

    /// Signs the typed delegation message binding
    /// `(protocol, main_account, view_account)`.
    async fn sign_delegation(&self, main_address: &str, view_address: &str) -> Result<Vec<u8>>;
}

/// In-memory test/local signer over a raw secp256k1 key.
pub struct LocalWalletSigner {
    key: SigningKey,
}

impl LocalWalletSigner {
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            key: signing_key_from_seed(&seed),
        }
    }
}

#[async_trait]
impl WalletSigner for LocalWalletSigner {
    fn address(&self) -> String {
        derive_address(&self.key)
    }

    async fn sign_delegation(&self, main_address: &str, view_address: &str) -> Result<Vec<u8>> {
        let message = delegation_message(main_address, view_address);
        sign_recoverable(&self.key, message.as_bytes())
    }
}

pub fn delegation_message(main_address: &str, view_address: &str) -> String {
    format!("{}-delegation:{}:{}", PROTOCOL_TAG, main_address, view_address)
}

/// Hashes a seed into a valid secp256k1 scalar, rehashing with a counter on
/// the (astronomically rare) invalid draw.
fn signing_key_from_seed(seed: &[u8; 32]) -> SigningKey {
    let mut candidate = *seed;
    let mut counter: u8 = 0;
    loop {
        if let Ok(key) = SigningKey::from_slice(&candidate) {
            return key;
        }
        let mut hasher = Sha256::new();
        hasher.update(candidate);
        hasher.update([counter]);
        candidate.copy_from_slice(&hasher.finalize());
        counter = counter.wrapping_add(1);
    }
}

/// Ethereum-style address: Keccak-256 of the uncompressed public key, last
/// 20 bytes, hex with `0x`.
pub fn derive_address(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// 65-byte `r || s || v` signature over the message.
pub fn sign_recoverable(key: &SigningKey, message: &[u8]) -> Result<Vec<u8>> {
    let (signature, recovery_id): (Signature, RecoveryId) = key
        .sign_recoverable(message)
        .map_err(|e| SdkError::Crypto(format!("Signing failed: {}", e)))?;

    let mut out = Vec::with_capacity(65);
    out.extend_from_slice(&signature.to_bytes());
    out.push(27 + recovery_id.to_byte());
    Ok(out)
}

/// Unlocked view account. Lives only in process memory; every persistence
/// path goes through the encrypted blob format below.
pub struct ViewAccount {
    signing_key: SigningKey,
    pub view_address: String,
    pub main_address: String,
    pub delegation_signature: Vec<u8>,
}

impl ViewAccount {
    pub fn new(signing_key: SigningKey, main_address: &str, delegation_signature: Vec<u8>) -> Self {
        let view_address = derive_address(&signing_key);
        Self {
            signing_key,
            view_address,
            main_address: main_address.to_string(),
            delegation_signature,
        }
    }

    pub fn sign_nonce(&self, nonce: &[u8]) -> Result<Vec<u8>> {
        sign_recoverable(&self.signing_key, nonce)
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes().into()
    }
}

/// At-rest ciphertext layout: every field a comma-delimited decimal byte
/// string, matching the persisted local state contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptedBlob {
    auth_tag: String,
    ciphertext: String,
    iv: String,
    salt: String,
}

fn bytes_to_delimited(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn delimited_to_bytes(s: &str) -> Result<Vec<u8>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|part| {
            part.parse::<u8>()
                .map_err(|_| SdkError::Serialization(format!("Bad byte segment '{}'", part)))
        })
        .collect()
}

fn derive_encryption_key(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut inner = Sha256::new();
    inner.update(KEYSTORE_DOMAIN);
    inner.update(salt);
    inner.update(password.as_bytes());
    let first = inner.finalize();

    let digest = Sha256::digest(first);
    digest.into()
}

fn encrypt_blob(plaintext: &[u8], password: &str) -> Result<EncryptedBlob> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut iv = [0u8; GCM_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let key = derive_encryption_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| SdkError::Crypto(format!("Cipher init failed: {}", e)))?;

    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| SdkError::Crypto("Encryption failed".into()))?;
    let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);

    Ok(EncryptedBlob {
        auth_tag: bytes_to_delimited(&tag),
        ciphertext: bytes_to_delimited(&sealed),
        iv: bytes_to_delimited(&iv),
        salt: bytes_to_delimited(&salt),
    })
}

fn decrypt_blob(blob: &EncryptedBlob, password: &str) -> Result<Vec<u8>> {
    let iv = delimited_to_bytes(&blob.iv)?;
    let salt = delimited_to_bytes(&blob.salt)?;
    let mut sealed = delimited_to_bytes(&blob.ciphertext)?;
    sealed.extend(delimited_to_bytes(&blob.auth_tag)?);

    if iv.len() != GCM_IV_LEN {
        return Err(SdkError::Serialization("Bad IV length".into()));
    }

    let key = derive_encryption_key(password, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| SdkError::Crypto(format!("Cipher init failed: {}", e)))?;

    // Tag mismatch is the one and only wrong-password signal.
    cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| SdkError::DecryptionFailure)
}

pub struct ViewAccountManager {
    db: LedgerDb,
}

impl ViewAccountManager {
    pub fn new(db: &LedgerDb) -> Self {
        Self { db: db.clone() }
    }

    fn view_key_slot(main_address: &str) -> String {
        format!("view.{}", main_address)
    }

    fn delegation_slot(main_address: &str) -> String {
        format!("delegation.{}", main_address)
    }

    /// Deterministic keypair from the password and main address. No network
    /// call, no persistence: used for first-time setup before the delegation
    /// is authorized.
    pub fn prepare_view_account(&self, main_address: &str, password: &str) -> (SigningKey, String) {
        let preimage = format!("{}_{}_{}", PROTOCOL_TAG, password, main_address);
        let first = Sha256::digest(preimage.as_bytes());
        let seed: [u8; 32] = Sha256::digest(first).into();

        let key = signing_key_from_seed(&seed);
        let address = derive_address(&key);
        (key, address)
    }

    /// Full setup: derive the keypair, have the primary wallet sign the
    /// delegation, encrypt and persist both secrets.
    pub async fn authorize(
        &self,
        signer: &dyn WalletSigner,
        password: &str,
    ) -> Result<ViewAccount> {
        let main_address = signer.address();
        let (signing_key, view_address) = self.prepare_view_account(&main_address, password);

        let delegation_signature = signer.sign_delegation(&main_address, &view_address).await?;

        let key_blob = encrypt_blob(&signing_key.to_bytes(), password)?;
        let delegation_blob = encrypt_blob(&delegation_signature, password)?;
        self.store_blob(&Self::view_key_slot(&main_address), &key_blob)?;
        self.store_blob(&Self::delegation_slot(&main_address), &delegation_blob)?;

        info!(main = %main_address, view = %view_address, "View account authorized");
        Ok(ViewAccount {
            signing_key,
            view_address,
            main_address,
            delegation_signature,
        })
    }

    fn store_blob(&self, slot: &str, blob: &EncryptedBlob) -> Result<()> {
        let encoded =
            serde_json::to_string(blob).map_err(|e| SdkError::Serialization(e.to_string()))?;
        self.db.put_account_blob(slot, &encoded)
    }

    fn load_blob(&self, slot: &str) -> Result<Option<EncryptedBlob>> {
        match self.db.get_account_blob(slot)? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| SdkError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn has_encrypted_view_account(&self, main_address: &str) -> Result<bool> {
        Ok(self.load_blob(&Self::view_key_slot(main_address))?.is_some()
            && self.load_blob(&Self::delegation_slot(main_address))?.is_some())
    }

    /// Decrypts both ciphertexts. A wrong password fails with
    /// `DecryptionFailure`; there is no separate validity check and no way
    /// to get a plausible-but-wrong key out.
    pub fn unlock_view_account(&self, main_address: &str, password: &str) -> Result<ViewAccount> {
        let key_blob = self
            .load_blob(&Self::view_key_slot(main_address))?
            .ok_or_else(|| SdkError::NotFound(format!("View account for {}", main_address)))?;
        let delegation_blob = self
            .load_blob(&Self::delegation_slot(main_address))?
            .ok_or_else(|| SdkError::NotFound(format!("Delegation for {}", main_address)))?;

        let key_bytes = decrypt_blob(&key_blob, password)?;
        let delegation_signature = decrypt_blob(&delegation_blob, password)?;

        let signing_key = SigningKey::from_slice(&key_bytes)
            .map_err(|e| SdkError::Crypto(format!("Stored key invalid: {}", e)))?;
        let view_address = derive_address(&signing_key);

        Ok(ViewAccount {
            signing_key,
            view_address,
            main_address: main_address.to_string(),
            delegation_signature,
        })
    }

    /// Wipes the persisted ciphertexts for the address. In-memory copies die
    /// with the `ViewAccount` value.
    pub fn reset(&self, main_address: &str) -> Result<()> {
        self.db
            .del_account_blob(&Self::view_key_slot(main_address))?;
        self.db.del_account_blob(&Self::delegation_slot(main_address))
    }
}
