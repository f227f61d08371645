//! Retirement certificates
//!
//! Retiring credits permanently removes them from circulation; the registry
//! issues a hash-stamped certificate recording the retirement and the ledger
//! transaction that backs it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::{AccountId, LedgerTxRef, LotId};
use types::numeric::Quantity;
use uuid::Uuid;

/// Certificate issued for one confirmed retirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetirementCertificate {
    pub certificate_id: Uuid,
    pub lot_id: LotId,
    pub account_id: AccountId,
    pub amount: Quantity,
    pub retired_at: i64, // Unix nanos
    /// Ledger transaction that finalized the retirement.
    pub ledger_tx_ref: LedgerTxRef,
    /// SHA-256 over the certificate fields, hex-encoded.
    pub content_hash: String,
}

impl RetirementCertificate {
    pub fn issue(
        lot_id: LotId,
        account_id: AccountId,
        amount: Quantity,
        retired_at: i64,
        ledger_tx_ref: LedgerTxRef,
    ) -> Self {
        let certificate_id = Uuid::now_v7();
        let content_hash = Self::compute_hash(
            &certificate_id,
            &lot_id,
            &account_id,
            amount,
            retired_at,
            &ledger_tx_ref,
        );
        Self {
            certificate_id,
            lot_id,
            account_id,
            amount,
            retired_at,
            ledger_tx_ref,
            content_hash,
        }
    }

    /// Recompute the content hash and compare against the stored one.
    pub fn verify(&self) -> bool {
        self.content_hash
            == Self::compute_hash(
                &self.certificate_id,
                &self.lot_id,
                &self.account_id,
                self.amount,
                self.retired_at,
                &self.ledger_tx_ref,
            )
    }

    fn compute_hash(
        certificate_id: &Uuid,
        lot_id: &LotId,
        account_id: &AccountId,
        amount: Quantity,
        retired_at: i64,
        ledger_tx_ref: &LedgerTxRef,
    ) -> String {
        let canonical = format!(
            "{certificate_id}|{lot_id}|{account_id}|{amount}|{retired_at}|{ledger_tx_ref}"
        );
        let digest = Sha256::digest(canonical.as_bytes());
        hex_encode(&digest)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
