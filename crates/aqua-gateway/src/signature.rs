//! Gateway callback signatures.
//!
//! The gateway signs `"{order_ref}|{payment_ref}"` with the merchant key
//! secret using HMAC-SHA256 and sends the lowercase hex digest. Verification
//! decodes the hex and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Keyed with the merchant key secret. **Key is redacted in `Debug` output.**
#[derive(Clone)]
pub struct PaymentSigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for PaymentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSigner")
            .field("key", &"<REDACTED>")
            .finish()
    }
}

impl PaymentSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> anyhow::Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            anyhow::bail!("GATEWAY_SECRET_EMPTY");
        }
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|_| anyhow::anyhow!("GATEWAY_SECRET_INVALID"))?;
        Ok(Self { keyed })
    }

    fn mac(&self, order_ref: &str, payment_ref: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(order_ref.as_bytes());
        mac.update(b"|");
        mac.update(payment_ref.as_bytes());
        mac
    }

    /// Hex signature the gateway would send for this pair.
    pub fn sign(&self, order_ref: &str, payment_ref: &str) -> String {
        hex::encode(self.mac(order_ref, payment_ref).finalize().into_bytes())
    }

    /// Constant-time check of a hex signature. Malformed hex is a mismatch.
    pub fn verify(&self, order_ref: &str, payment_ref: &str, signature_hex: &str) -> bool {
        let Ok(provided) = hex::decode(signature_hex.trim()) else {
            return false;
        };
        self.mac(order_ref, payment_ref)
            .verify_slice(&provided)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_order_and_payment_refs_joined_by_pipe() {
        let signer = PaymentSigner::new("secret").unwrap();

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(b"order_1|pay_1");
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(signer.sign("order_1", "pay_1"), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn verify_accepts_own_signature() {
        let signer = PaymentSigner::new("secret").unwrap();
        let sig = signer.sign("order_1", "pay_1");
        assert!(signer.verify("order_1", "pay_1", &sig));
        assert!(signer.verify("order_1", "pay_1", &sig.to_uppercase()));
    }

    #[test]
    fn verify_rejects_tampering() {
        let signer = PaymentSigner::new("secret").unwrap();
        let sig = signer.sign("order_1", "pay_1");
        assert!(!signer.verify("order_1", "pay_2", &sig));
        assert!(!signer.verify("order_2", "pay_1", &sig));
        assert!(!PaymentSigner::new("other").unwrap().verify("order_1", "pay_1", &sig));
        assert!(!signer.verify("order_1", "pay_1", "not-hex"));
        assert!(!signer.verify("order_1", "pay_1", ""));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(PaymentSigner::new("").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let s = format!("{:?}", PaymentSigner::new("super-secret-value").unwrap());
        assert!(!s.contains("super-secret-value"));
        assert!(s.contains("REDACTED"));
    }
}
