//! LoRaWAN 1.0 security codec
//!
//! This module provides cryptographic functions for LoRaWAN security:
//! - Message Integrity Code (MIC) computation and validation
//! - FRMPayload encryption/decryption
//! - Join request MIC and join accept decryption
//! - Session key derivation

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use heapless::Vec;

use crate::config::device::{AESKey, DevAddr};
use crate::error::ProtocolError;

/// MIC size in bytes
pub const MIC_SIZE: usize = 4;

/// Largest PHY payload handled by the simulator
pub const MAX_FRAME_SIZE: usize = 256;

/// Block size for AES-128
const BLOCK_SIZE: usize = 16;

/// Direction identifiers for cryptographic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Uplink (device to network)
    Up = 0,
    /// Downlink (network to device)
    Down = 1,
}

fn cipher(key: &AESKey) -> Aes128 {
    <Aes128 as KeyInit>::new(GenericArray::from_slice(key.as_bytes()))
}

fn cmac(key: &AESKey, chunks: &[&[u8]]) -> [u8; MIC_SIZE] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(key.as_bytes()));
    for chunk in chunks {
        mac.update(chunk);
    }
    let tag = mac.finalize().into_bytes();

    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&tag[..MIC_SIZE]);
    mic
}

/// Counter block shared by MIC (B0) and encryption (Ai) computations
fn frame_block(
    tag: u8,
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
    last: u8,
) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = tag;
    block[5] = dir as u8;
    block[6..10].copy_from_slice(&dev_addr.to_wire());
    block[10..14].copy_from_slice(&fcnt.to_le_bytes());
    block[15] = last;
    block
}

/// Compute the MIC of a data frame
///
/// # Arguments
/// * `key` - Network session key
/// * `data` - MHDR | FHDR | FPort | FRMPayload
/// * `dev_addr` - Device address
/// * `fcnt` - Frame counter
/// * `dir` - Message direction
pub fn compute_data_mic(
    key: &AESKey,
    data: &[u8],
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
) -> [u8; MIC_SIZE] {
    let b0 = frame_block(0x49, dev_addr, fcnt, dir, data.len() as u8);
    cmac(key, &[&b0, data])
}

/// Check the MIC of a data frame
pub fn validate_data_mic(
    key: &AESKey,
    data: &[u8],
    mic: &[u8],
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
) -> bool {
    compute_data_mic(key, data, dev_addr, fcnt, dir) == mic
}

/// Encrypt or decrypt FRMPayload (the operation is symmetric)
///
/// # Arguments
/// * `key` - AppSKey for application ports, NwkSKey for port 0
/// * `dev_addr` - Device address
/// * `fcnt` - Frame counter
/// * `dir` - Message direction
/// * `payload` - Data to encrypt/decrypt
pub fn encrypt_frm_payload(
    key: &AESKey,
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
    payload: &[u8],
) -> Result<Vec<u8, MAX_FRAME_SIZE>, ProtocolError> {
    let cipher = cipher(key);
    let mut result: Vec<u8, MAX_FRAME_SIZE> =
        Vec::from_slice(payload).map_err(|_| ProtocolError::FrameTooLong(MAX_FRAME_SIZE))?;

    for (i, chunk) in result.chunks_mut(BLOCK_SIZE).enumerate() {
        let mut s = frame_block(0x01, dev_addr, fcnt, dir, (i + 1) as u8);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut s));
        for (b, k) in chunk.iter_mut().zip(s.iter()) {
            *b ^= k;
        }
    }

    Ok(result)
}

/// Compute the MIC of a join request (MHDR | JoinEUI | DevEUI | DevNonce)
pub fn compute_join_request_mic(app_key: &AESKey, data: &[u8]) -> [u8; MIC_SIZE] {
    cmac(app_key, &[data])
}

/// Compute the MIC of a decrypted join accept (MHDR | AppNonce .. CFList)
pub fn compute_join_accept_mic(app_key: &AESKey, data: &[u8]) -> [u8; MIC_SIZE] {
    cmac(app_key, &[data])
}

/// Decrypt a join accept body (everything after MHDR, MIC included)
///
/// The network server encrypts with AES decrypt, so the device applies
/// AES encrypt block by block.
pub fn decrypt_join_accept(app_key: &AESKey, data: &[u8]) -> Result<Vec<u8, 32>, ProtocolError> {
    if data.len() != 16 && data.len() != 32 {
        return Err(ProtocolError::Truncated("join accept"));
    }

    let cipher = cipher(app_key);
    let mut result: Vec<u8, 32> =
        Vec::from_slice(data).map_err(|_| ProtocolError::FrameTooLong(32))?;
    for chunk in result.chunks_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }

    Ok(result)
}

/// Derive network and application session keys from a join accept
///
/// # Arguments
/// * `app_key` - Application key
/// * `app_nonce` - AppNonce as received (little-endian)
/// * `net_id` - NetID as received (little-endian)
/// * `dev_nonce` - DevNonce of the join request
pub fn derive_session_keys(
    app_key: &AESKey,
    app_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: u16,
) -> (AESKey, AESKey) {
    let cipher = cipher(app_key);

    let derive = |prefix: u8| {
        let mut block = [0u8; BLOCK_SIZE];
        block[0] = prefix;
        block[1..4].copy_from_slice(app_nonce);
        block[4..7].copy_from_slice(net_id);
        block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        AESKey::new(block)
    };

    (derive(0x01), derive(0x02))
}

/// Class B ping offset within a beacon period, in slots
///
/// Rand = aes128_encrypt(0x00 key, BeaconTime | DevAddr | pad16), the offset
/// is `(Rand[0] + Rand[1] * 256) % ping_period`.
pub fn ping_offset(beacon_time: u32, dev_addr: DevAddr, ping_period: u32) -> u32 {
    let mut block = [0u8; BLOCK_SIZE];
    block[0..4].copy_from_slice(&beacon_time.to_le_bytes());
    block[4..8].copy_from_slice(&dev_addr.to_wire());
    cipher(&AESKey::new([0; 16])).encrypt_block(GenericArray::from_mut_slice(&mut block));

    (block[0] as u32 + block[1] as u32 * 256) % ping_period.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AESKey = AESKey::new([
        0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F,
        0x3C,
    ]);

    #[test]
    fn test_cmac_known_answer() {
        // RFC 4493 example 2
        let msg = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        assert_eq!(cmac(&KEY, &[&msg]), [0x07, 0x0a, 0x16, 0xb4]);
        // Chunked input gives the same tag
        assert_eq!(cmac(&KEY, &[&msg[..5], &msg[5..]]), [0x07, 0x0a, 0x16, 0xb4]);
    }

    #[test]
    fn test_payload_encryption_is_symmetric() {
        let dev_addr = DevAddr::new([0x01, 0x02, 0x03, 0x04]);
        let payload = b"a payload longer than one AES block";

        let encrypted = encrypt_frm_payload(&KEY, dev_addr, 7, Direction::Down, payload).unwrap();
        assert_ne!(&encrypted[..], &payload[..]);
        assert_eq!(encrypted.len(), payload.len());

        let decrypted =
            encrypt_frm_payload(&KEY, dev_addr, 7, Direction::Down, &encrypted).unwrap();
        assert_eq!(&decrypted[..], &payload[..]);

        // Different counter, different keystream
        let other = encrypt_frm_payload(&KEY, dev_addr, 8, Direction::Down, payload).unwrap();
        assert_ne!(encrypted, other);
    }

    #[test]
    fn test_mic_depends_on_direction_and_counter() {
        let dev_addr = DevAddr::new([0x26, 0x01, 0x1B, 0xDA]);
        let data = [0x60, 0xDA, 0x1B, 0x01, 0x26, 0x00, 0x01, 0x00];

        let mic = compute_data_mic(&KEY, &data, dev_addr, 1, Direction::Down);
        assert!(validate_data_mic(&KEY, &data, &mic, dev_addr, 1, Direction::Down));
        assert!(!validate_data_mic(&KEY, &data, &mic, dev_addr, 1, Direction::Up));
        assert!(!validate_data_mic(&KEY, &data, &mic, dev_addr, 2, Direction::Down));
    }

    #[test]
    fn test_join_accept_decryption_inverts_server_encryption() {
        use aes::cipher::BlockDecrypt;

        let plain = [0x5Au8; 16];
        let mut encrypted = plain;
        cipher(&KEY).decrypt_block(GenericArray::from_mut_slice(&mut encrypted));

        let decrypted = decrypt_join_accept(&KEY, &encrypted).unwrap();
        assert_eq!(&decrypted[..], &plain[..]);

        assert!(decrypt_join_accept(&KEY, &[0u8; 12]).is_err());
    }

    #[test]
    fn test_session_keys_differ() {
        let (nwk_skey, app_skey) = derive_session_keys(&KEY, &[1, 2, 3], &[4, 5, 6], 0x0708);
        assert_ne!(nwk_skey, app_skey);

        let (again, _) = derive_session_keys(&KEY, &[1, 2, 3], &[4, 5, 6], 0x0709);
        assert_ne!(nwk_skey, again);
    }
}
