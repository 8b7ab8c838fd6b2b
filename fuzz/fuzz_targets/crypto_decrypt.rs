#![no_main]

use libfuzzer_sys::fuzz_target;
use pdm_crypto::{decrypt, derive, NONCE_LEN, SALT_LEN};

/// Arbitrary bytes fed to AES-256-GCM decryption under a fixed key. Every
/// input short of a genuine encrypt/decrypt round trip is expected
/// ciphertext, so this must always return `Err`, never panic or succeed.
fuzz_target!(|data: &[u8]| {
    if data.len() < NONCE_LEN {
        return;
    }
    let salt = [0u8; SALT_LEN];
    let key = derive("fuzz-passphrase", &salt);

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[..NONCE_LEN]);
    let ciphertext = &data[NONCE_LEN..];

    let _ = decrypt(&key, &nonce, ciphertext);
});
