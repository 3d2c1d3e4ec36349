//! Elliptic curve integrated encryption over P-256.
//!
//! Wire-compatible with go-ethereum's `crypto/ecies` package using its
//! `ECIES_AES128_SHA256` parameters, which is what the config server uses
//! to seal device bundles.
//!
//! ```text
//! ciphertext = R || iv || AES-128-CTR(Ke, iv, m) || tag
//!
//! R   ephemeral sender public key, SEC1 encoded (65 bytes uncompressed)
//! z   ECDH(device_key, R), big-endian x coordinate (32 bytes)
//! K   ConcatKDF-SHA256(z, s1 = "", 32 bytes), Ke = K[..16]
//! Km  SHA256(K[16..])
//! tag HMAC-SHA256(Km, iv || c || s2 = "")
//! ```

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use p256::PublicKey;
use p256::ecdh::{EphemeralSecret, diffie_hellman};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use super::{CryptoError, DeviceKey};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 16;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const UNCOMPRESSED_POINT_LEN: usize = 65;
const COMPRESSED_POINT_LEN: usize = 33;

/// Decrypt a sealed bundle with the device key
pub fn decrypt(key: &DeviceKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let point_len = match ciphertext.first() {
        Some(0x04) => UNCOMPRESSED_POINT_LEN,
        Some(0x02) | Some(0x03) => COMPRESSED_POINT_LEN,
        Some(_) => return Err(CryptoError::InvalidPublicKey),
        None => return Err(CryptoError::Truncated(0)),
    };

    if ciphertext.len() < point_len + IV_LEN + TAG_LEN {
        return Err(CryptoError::Truncated(ciphertext.len()));
    }

    let (ephemeral, rest) = ciphertext.split_at(point_len);
    let (em, tag) = rest.split_at(rest.len() - TAG_LEN);

    let ephemeral =
        PublicKey::from_sec1_bytes(ephemeral).map_err(|_| CryptoError::InvalidPublicKey)?;

    let shared = diffie_hellman(key.secret().to_nonzero_scalar(), ephemeral.as_affine());
    let (ke, km) = derive_keys(shared.raw_secret_bytes().as_slice());

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&km)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    mac.update(em);
    mac.verify_slice(tag).map_err(|_| CryptoError::InvalidTag)?;

    let (iv, body) = em.split_at(IV_LEN);
    let mut plaintext = body.to_vec();
    let mut cipher =
        Aes128Ctr::new_from_slices(&ke, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
    cipher.apply_keystream(&mut plaintext);

    Ok(plaintext)
}

/// Seal `plaintext` to a device public key
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);

    let shared = ephemeral.diffie_hellman(recipient);
    let (ke, km) = derive_keys(shared.raw_secret_bytes().as_slice());

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut body = plaintext.to_vec();
    let mut cipher =
        Aes128Ctr::new_from_slices(&ke, &iv).map_err(|_| CryptoError::InvalidKeyLength)?;
    cipher.apply_keystream(&mut body);

    let mut out = Vec::with_capacity(UNCOMPRESSED_POINT_LEN + IV_LEN + body.len() + TAG_LEN);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&body);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(&km)
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    mac.update(&out[UNCOMPRESSED_POINT_LEN..]);
    out.extend_from_slice(&mac.finalize().into_bytes());

    Ok(out)
}

/// Split the KDF output into the cipher key and the MAC key
fn derive_keys(z: &[u8]) -> ([u8; KEY_LEN], [u8; 32]) {
    let k = concat_kdf(z, &[], 2 * KEY_LEN);

    let mut ke = [0u8; KEY_LEN];
    ke.copy_from_slice(&k[..KEY_LEN]);
    let km: [u8; 32] = Sha256::digest(&k[KEY_LEN..]).into();

    (ke, km)
}

/// NIST SP 800-56 concatenation KDF with SHA-256
fn concat_kdf(z: &[u8], s1: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 32);
    let mut counter: u32 = 1;

    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(s1);
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }

    out.truncate(len);
    out
}
