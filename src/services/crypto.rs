use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use ring::{aead, pbkdf2, rand::{SecureRandom, SystemRandom}};
use std::num::NonZeroU32;

const KEYCHAIN_SERVICE: &str = "ledgerdrop";
const APP_SECRET: &[u8] = b"ledgerdrop-secret-v1";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// Keeps secrets out of the settings table: the OS keychain when it is
/// reachable, AES-256-GCM with a PBKDF2-derived key otherwise.
pub struct CryptoService;

impl CryptoService {
    pub fn seal_secret(account: &str, secret: &str) -> Result<String> {
        if let Ok(reference) = Self::store_in_keychain(account, secret) {
            return Ok(reference);
        }
        Self::encrypt_symmetric(secret)
    }

    /// Skips the keychain entirely.
    pub fn seal_secret_local(secret: &str) -> Result<String> {
        Self::encrypt_symmetric(secret)
    }

    pub fn open_secret(sealed: &str) -> Result<String> {
        if sealed.starts_with("keychain:") {
            return Self::retrieve_from_keychain(sealed);
        }
        if sealed.starts_with("enc:") {
            return Self::decrypt_symmetric(sealed);
        }
        Err(anyhow!("Unknown encrypted format"))
    }

    /// Best effort; a symmetric payload has nothing to remove.
    pub fn forget_secret(sealed: &str) {
        if let Some(account) = keychain_account(sealed) {
            if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, account) {
                let _ = entry.delete_password();
            }
        }
    }

    fn store_in_keychain(account: &str, secret: &str) -> Result<String> {
        keyring::Entry::new(KEYCHAIN_SERVICE, account)
            .map_err(|e| anyhow!("Keychain error: {}", e))?
            .set_password(secret)
            .map_err(|e| anyhow!("Keychain store error: {}", e))?;
        Ok(format!("keychain:{}:{}", KEYCHAIN_SERVICE, account))
    }

    fn retrieve_from_keychain(reference: &str) -> Result<String> {
        let account = keychain_account(reference).ok_or_else(|| anyhow!("Invalid keychain reference"))?;
        keyring::Entry::new(KEYCHAIN_SERVICE, account)
            .map_err(|e| anyhow!("Keychain error: {}", e))?
            .get_password()
            .map_err(|e| anyhow!("Keychain fetch error: {}", e))
    }

    fn encrypt_symmetric(plaintext: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let mut salt = [0u8; SALT_LEN];
        rng.fill(&mut salt)
            .map_err(|_| anyhow!("Failed to generate salt"))?;

        let key = derive_key(&salt)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| anyhow!("Failed to generate nonce"))?;

        let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);
        let mut in_out = plaintext.as_bytes().to_vec();
        key.seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
            .map_err(|_| anyhow!("Encryption failed"))?;

        Ok(format!(
            "enc:{}:{}:{}",
            general_purpose::STANDARD.encode(salt),
            general_purpose::STANDARD.encode(nonce_bytes),
            general_purpose::STANDARD.encode(in_out)
        ))
    }

    fn decrypt_symmetric(ciphertext: &str) -> Result<String> {
        let parts: Vec<&str> = ciphertext.split(':').collect();
        let [_, salt, nonce, data] = parts.as_slice() else {
            return Err(anyhow!("Invalid encrypted payload"));
        };
        let salt = general_purpose::STANDARD
            .decode(salt)
            .map_err(|e| anyhow!("Decode salt: {}", e))?;
        let nonce_bytes = general_purpose::STANDARD
            .decode(nonce)
            .map_err(|e| anyhow!("Decode nonce: {}", e))?;
        let mut data = general_purpose::STANDARD
            .decode(data)
            .map_err(|e| anyhow!("Decode ciphertext: {}", e))?;

        let key = derive_key(&salt)?;
        let nonce = aead::Nonce::assume_unique_for_key(
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow!("Invalid nonce length"))?,
        );

        let decrypted = key
            .open_in_place(nonce, aead::Aad::empty(), &mut data)
            .map_err(|_| anyhow!("Decryption failed"))?;
        Ok(String::from_utf8(decrypted.to_vec())?)
    }
}

fn keychain_account(reference: &str) -> Option<&str> {
    let rest = reference.strip_prefix("keychain:")?;
    let (service, account) = rest.split_once(':')?;
    (service == KEYCHAIN_SERVICE && !account.is_empty()).then_some(account)
}

fn derive_key(salt: &[u8]) -> Result<aead::LessSafeKey> {
    let mut key_bytes = [0u8; 32];
    let iterations = NonZeroU32::new(PBKDF2_ITERATIONS).ok_or_else(|| anyhow!("Invalid iterations"))?;
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        APP_SECRET,
        &mut key_bytes,
    );
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key_bytes)
        .map_err(|_| anyhow!("Invalid key material"))?;
    Ok(aead::LessSafeKey::new(unbound))
}
