use crate::ledger::{Asset, Operation, DEFAULT_VALIDITY_SECS};
use chrono::Duration;

/// The trustline pair a new account needs to hold the custody asset.
///
/// `change_trust` belongs inside the sponsorship block (the trustline reserve
/// is what the sponsor pays for); `allow_trust` is issued by the custody
/// account after the block closes.
#[derive(Debug, Clone)]
pub struct AssetAccess {
    pub change_trust: Operation,
    pub allow_trust: Operation,
}

/// Trust and custody policy applied to every provisioned account.
///
/// The policy is a pure function of "does this account hold the custody
/// asset"; user and group accounts are treated identically.
#[derive(Debug, Clone)]
pub struct CustodyPolicy {
    /// Code of the asset issued 1:1 against settled mobile-money deposits.
    pub asset_code: String,
    /// Weight at which the custody credential is registered on every
    /// provisioned account, high enough to co-sign administrative operations.
    pub custody_signer_weight: u8,
    /// Validity window applied to every built transaction.
    pub tx_validity_secs: i64,
}

impl Default for CustodyPolicy {
    fn default() -> Self {
        Self {
            asset_code: "KESM".to_string(),
            custody_signer_weight: 10,
            tx_validity_secs: DEFAULT_VALIDITY_SECS,
        }
    }
}

impl CustodyPolicy {
    /// The custody asset as issued by the given custody account.
    pub fn asset(&self, issuer: &str) -> Asset {
        Asset::new(self.asset_code.clone(), issuer)
    }

    pub fn tx_validity(&self) -> Duration {
        Duration::seconds(self.tx_validity_secs)
    }

    /// Operations granting `account` access to the custody asset.
    pub fn grant_asset_access(&self, account: &str, issuer: &str) -> AssetAccess {
        AssetAccess {
            change_trust: Operation::ChangeTrust {
                source: account.to_string(),
                asset: self.asset(issuer),
            },
            allow_trust: Operation::AllowTrust {
                trustor: account.to_string(),
                asset_code: self.asset_code.clone(),
                authorize: true,
            },
        }
    }
}
