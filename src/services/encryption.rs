use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

/// Sealed secret as stored in the database: ciphertext, 12-byte IV, 16-byte tag.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}

/// Derive a center-specific key from the master key.
pub fn derive_tenant_key(master_key: &[u8], tenant: &str) -> Result<[u8; 32]> {
    if master_key.len() != 32 {
        anyhow::bail!("Master key must be exactly 32 bytes");
    }

    let hk = Hkdf::<Sha256>::new(None, master_key);
    let info = format!("tutorcenter-tenant-{}", tenant);
    let mut tenant_key = [0u8; 32];
    hk.expand(info.as_bytes(), &mut tenant_key)
        .map_err(|_| anyhow::anyhow!("Failed to derive tenant key"))?;

    Ok(tenant_key)
}

/// Encrypt with AES-256-GCM under a fresh random IV.
pub fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(key).context("Failed to create cipher")?;

    let mut iv = vec![0u8; 12];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    // aes-gcm appends the 16-byte tag to the ciphertext
    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;
    let tag = ciphertext.split_off(ciphertext.len().saturating_sub(16));

    Ok(Sealed { ciphertext, iv, tag })
}

pub fn open(sealed: &Sealed, key: &[u8; 32]) -> Result<Vec<u8>> {
    if sealed.iv.len() != 12 {
        anyhow::bail!("IV must be exactly 12 bytes");
    }
    if sealed.tag.len() != 16 {
        anyhow::bail!("Authentication tag must be exactly 16 bytes");
    }

    let cipher = Aes256Gcm::new_from_slice(key).context("Failed to create cipher")?;
    let nonce = Nonce::from_slice(&sealed.iv);

    let mut combined = sealed.ciphertext.clone();
    combined.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(nonce, combined.as_ref())
        .map_err(|e| anyhow::anyhow!("Decryption failed (data may be corrupted or tampered): {}", e))
}

/// Seal a UTF-8 secret (e.g. a gateway API key) for a center.
pub fn seal_secret(master_key: &[u8; 32], tenant: &str, secret: &str) -> Result<Sealed> {
    let key = derive_tenant_key(master_key, tenant)?;
    seal(secret.as_bytes(), &key)
}

pub fn open_secret(master_key: &[u8; 32], tenant: &str, sealed: &Sealed) -> Result<String> {
    let key = derive_tenant_key(master_key, tenant)?;
    let bytes = open(sealed, &key)?;
    String::from_utf8(bytes).context("Decrypted secret is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_keys_are_deterministic_and_distinct() {
        let master_key = [0u8; 32];
        let key1 = derive_tenant_key(&master_key, "tenant1").unwrap();
        let key2 = derive_tenant_key(&master_key, "tenant2").unwrap();
        let key1_again = derive_tenant_key(&master_key, "tenant1").unwrap();

        assert_eq!(key1, key1_again);
        assert_ne!(key1, key2);
    }

    #[test]
    fn short_master_key_is_rejected() {
        assert!(derive_tenant_key(&[1u8; 16], "tenant").is_err());
    }

    #[test]
    fn secret_survives_seal_and_open() {
        let master = [7u8; 32];
        let sealed = seal_secret(&master, "alpha", "gw-live-key-123").unwrap();
        assert_eq!(sealed.iv.len(), 12);
        assert_eq!(sealed.tag.len(), 16);
        assert_ne!(sealed.ciphertext, b"gw-live-key-123");
        assert_eq!(open_secret(&master, "alpha", &sealed).unwrap(), "gw-live-key-123");
    }

    #[test]
    fn secret_sealed_for_one_center_does_not_open_for_another() {
        let master = [7u8; 32];
        let sealed = seal_secret(&master, "alpha", "gw-live-key-123").unwrap();
        assert!(open_secret(&master, "beta", &sealed).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [42u8; 32];
        let mut sealed = seal(b"Original data", &key).unwrap();
        sealed.ciphertext[0] ^= 1;
        assert!(open(&sealed, &key).is_err());
    }
}
