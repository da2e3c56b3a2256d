//! Key ceremony: one-time establishment of the group key material for a
//! chain's signer set.
//!
//! Key shares are produced by a trusted dealer
//! (`frost::keys::generate_with_dealer`). A distributed keygen would remove
//! the dealer from the trust model but needs a signer-to-signer transport
//! this core does not carry; the provenance is recorded on the ceremony row
//! so both kinds can coexist.

use std::collections::BTreeMap;

use chrono::Utc;
use frost_secp256k1 as frost;
use frost::keys::{IdentifierList, KeyPackage, PublicKeyPackage};
use frost::Identifier;
use rand::thread_rng;
use tracing::info;
use uuid::Uuid;

use bridge_types::{CeremonyStatus, Chain, KeyCeremonyRecord};

use crate::Result;

/// Provenance string recorded on ceremony rows produced by the dealer.
pub const TRUSTED_DEALER: &str = "trusted_dealer";

/// Output of a completed key ceremony: per-signer key packages (keyed by
/// 1-based signer index) and the shared public key package.
pub struct CeremonyOutput {
    pub key_packages: BTreeMap<u16, KeyPackage>,
    pub public_key_package: PublicKeyPackage,
    pub group_public_key_hex: String,
    /// Serialized form of `public_key_package`, as persisted on the
    /// ceremony row for per-chain key resolution.
    pub public_key_package_hex: String,
}

/// Trusted-dealer key generation for a t-of-n signer set.
pub struct TrustedDealer;

impl TrustedDealer {
    /// Run the ceremony and return the key material.
    pub fn run(threshold: u16, total_signers: u16) -> Result<CeremonyOutput> {
        let mut rng = thread_rng();

        let (shares, public_key_package) = frost::keys::generate_with_dealer(
            total_signers,
            threshold,
            IdentifierList::Default,
            &mut rng,
        )?;

        let mut key_packages = BTreeMap::new();
        for index in 1..=total_signers {
            let identifier = Identifier::try_from(index)?;
            let share = shares
                .get(&identifier)
                .expect("dealer produced a share for every default identifier");
            key_packages.insert(index, KeyPackage::try_from(share.clone())?);
        }

        let group_public_key_hex =
            hex::encode(public_key_package.verifying_key().serialize()?);
        let public_key_package_hex = hex::encode(public_key_package.serialize()?);

        info!(
            threshold = threshold,
            total_signers = total_signers,
            group_public_key = %group_public_key_hex,
            "key ceremony complete"
        );

        Ok(CeremonyOutput {
            key_packages,
            public_key_package,
            group_public_key_hex,
            public_key_package_hex,
        })
    }

    /// The persisted record for a ceremony run for `chain`, completed in the
    /// same call since the dealer is local.
    pub fn record(chain: Chain, threshold: u16, total_signers: u16, output: &CeremonyOutput) -> KeyCeremonyRecord {
        let now = Utc::now();
        KeyCeremonyRecord {
            id: Uuid::new_v4(),
            chain,
            threshold,
            total_signers,
            group_public_key: Some(output.group_public_key_hex.clone()),
            public_key_package: Some(output.public_key_package_hex.clone()),
            kind: TRUSTED_DEALER.to_string(),
            status: CeremonyStatus::Completed,
            created_at: now,
            completed_at: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_of_three_ceremony() {
        let output = TrustedDealer::run(2, 3).expect("ceremony failed");
        assert_eq!(output.key_packages.len(), 3);
        assert!(output.key_packages.keys().eq([1u16, 2, 3].iter()));
        hex::decode(&output.group_public_key_hex).expect("group key must be hex");
    }

    #[test]
    fn record_is_completed_with_group_key() {
        let output = TrustedDealer::run(2, 3).unwrap();
        let record = TrustedDealer::record(Chain::Ton, 2, 3, &output);
        assert_eq!(record.status, CeremonyStatus::Completed);
        assert_eq!(record.kind, TRUSTED_DEALER);
        assert_eq!(
            record.group_public_key.as_deref(),
            Some(output.group_public_key_hex.as_str())
        );
        let encoded = record.public_key_package.expect("key package persisted");
        let decoded = PublicKeyPackage::deserialize(&hex::decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded.verifying_key(), output.public_key_package.verifying_key());
        assert!(record.completed_at.is_some());
    }
}
