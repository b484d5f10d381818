//! Session-key authorization.
//!
//! The wallet key signs an EIP-712 envelope delegating a scope to a fresh
//! session key; the session key then answers the broker's challenge and
//! signs every subsequent request, so the wallet key is only touched once
//! per connection.

use alloy::primitives::{Address, Signature, B256};
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolStruct};

sol! {
    struct SessionKeyAuthorization {
        address wallet;
        address sessionKey;
        string scope;
        uint64 expiresAt;
    }
}

/// Scope granted to session keys. Transfers only, no channel closure.
pub const SESSION_SCOPE: &str = "transfer";

/// Session key lifetime in seconds.
pub const SESSION_TTL_SECS: u64 = 3600;

pub fn signing_domain() -> Eip712Domain {
    eip712_domain! {
        name: "cove-broker",
        version: "1",
    }
}

/// The EIP-712 digest the wallet signs to authorize `session_key`.
pub fn authorization_hash(
    wallet: Address,
    session_key: Address,
    expires_at: u64,
) -> B256 {
    let auth = SessionKeyAuthorization {
        wallet,
        sessionKey: session_key,
        scope: SESSION_SCOPE.to_string(),
        expiresAt: expires_at,
    };
    auth.eip712_signing_hash(&signing_domain())
}

pub fn sig_to_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    #[test]
    fn test_authorization_hash_is_deterministic() {
        let wallet = Address::repeat_byte(0x11);
        let session = Address::repeat_byte(0x22);
        let a = authorization_hash(wallet, session, 1000);
        let b = authorization_hash(wallet, session, 1000);
        assert_eq!(a, b);
        let c = authorization_hash(wallet, session, 1001);
        assert_ne!(a, c);
    }

    #[test]
    fn test_wallet_signature_recovers() {
        let wallet = PrivateKeySigner::random();
        let session = PrivateKeySigner::random();
        let hash = authorization_hash(wallet.address(), session.address(), 42);
        let sig = wallet.sign_hash_sync(&hash).unwrap();
        let recovered = sig.recover_address_from_prehash(&hash).unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn test_sig_hex_is_65_bytes() {
        let signer = PrivateKeySigner::random();
        let hash = B256::repeat_byte(7);
        let sig = signer.sign_hash_sync(&hash).unwrap();
        let hex = sig_to_hex(&sig);
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 2 + 65 * 2);
    }
}
