//! Destination-address format validation, per chain.
//!
//! Format checks only; ownership or checksum validation beyond the pattern
//! is the chain collaborator's problem.

use std::sync::OnceLock;

use regex::Regex;

use crate::chain::Chain;

/// Validate a destination address for the given chain.
pub fn validate_address(chain: Chain, address: &str) -> bool {
    match chain {
        Chain::Xmr => validate_xmr_address(address),
        Chain::Btc => validate_btc_address(address),
        Chain::Eth | Chain::Arb | Chain::Base | Chain::Usdc | Chain::Usdt => {
            validate_eth_address(address)
        }
        Chain::Ton => validate_ton_address(address),
        Chain::Sol => validate_sol_address(address),
    }
}

/// Monero: standard address starts with `4`, sub-address with `8`, followed
/// by 94 base58 characters.
pub fn validate_xmr_address(addr: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[48][1-9A-HJ-NP-Za-km-z]{94}$").unwrap());
    re.is_match(addr)
}

/// Bitcoin: bech32 (`bc1...`), P2PKH (`1...`), or P2SH (`3...`).
pub fn validate_btc_address(addr: &str) -> bool {
    static RE_BECH32: OnceLock<Regex> = OnceLock::new();
    static RE_LEGACY: OnceLock<Regex> = OnceLock::new();

    let bech32 = RE_BECH32.get_or_init(|| Regex::new(r"^bc1[a-z0-9]{25,87}$").unwrap());
    let legacy =
        RE_LEGACY.get_or_init(|| Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$").unwrap());

    bech32.is_match(addr) || legacy.is_match(addr)
}

/// EVM chains: 0x-prefixed 40 hex characters.
pub fn validate_eth_address(addr: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap());
    re.is_match(addr)
}

/// TON: user-friendly (`EQ`/`UQ` + 46 base64url chars) or raw
/// (`0:` + 64 hex chars).
pub fn validate_ton_address(addr: &str) -> bool {
    static RE_FRIENDLY: OnceLock<Regex> = OnceLock::new();
    static RE_RAW: OnceLock<Regex> = OnceLock::new();

    let friendly =
        RE_FRIENDLY.get_or_init(|| Regex::new(r"^(EQ|UQ)[A-Za-z0-9_-]{46}$").unwrap());
    let raw = RE_RAW.get_or_init(|| Regex::new(r"^0:[a-fA-F0-9]{64}$").unwrap());

    friendly.is_match(addr) || raw.is_match(addr)
}

/// Solana: base58 public key, 32-44 characters.
pub fn validate_sol_address(addr: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").unwrap());
    re.is_match(addr)
}
