//! Cryptographic functions used for address resolution
//!
//! These functions are derived from the Bluetooth Specification v5.0 | Vol 3, Part H, section 2.2:
//! *Cryptographic Toolbox*. Only the functions needed for resolving a resolvable private address
//! are here, everything used for pairing belongs to the Security Manager.
//!
//! # Note
//! All `u128` inputs are in the big-endian order used by the specification's sample data.

/// 24-bit hash function
///
/// Used in random address creation and resolution.
pub fn ah(k: u128, r: [u8; 3]) -> [u8; 3] {
    let r_padded = <u128>::from(r[0]) | <u128>::from(r[1]) << 8 | <u128>::from(r[2]) << 16;

    let cypher_text = e(k, r_padded);

    [cypher_text as u8, (cypher_text >> 8) as u8, (cypher_text >> 16) as u8]
}

/// Security function *e*
///
/// Generates 128-bit encrypted data from a 128-bit key using the AES-128 block cypher. A new
/// cypher is initialized on each call.
pub fn e(key: u128, plain_text: u128) -> u128 {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    let key_bytes = key.to_be_bytes();

    let cipher = aes::Aes128::new(GenericArray::from_slice(&key_bytes));

    let mut block = plain_text.to_be_bytes();

    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    <u128>::from_be_bytes(block)
}
