//! Client and prekey profiles.
//!
//! Profiles are signed, expiring statements. A client profile binds a
//! device (instance tag) to a long-term key, a forging key and the
//! protocol versions it speaks; a prekey profile binds the device to a
//! medium-term shared ECDH point. Both are signed over their canonical
//! pre-signature serialization and validated without side effects.

use keyloft_crypto::eddsa::{self, Signature, SIGNATURE_LEN};
use keyloft_crypto::keys::validate_point;
use keyloft_crypto::{EdwardsPoint, Keypair};

use crate::codec::{Decoder, Encoder};
use crate::error::{ProfileFault, ProtocolError};

/// Version character a client profile must advertise to be usable here.
const REQUIRED_VERSION: char = '4';

/// A client's signed identity statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub instance_tag: u32,
    pub public_key: EdwardsPoint,
    pub forging_key: EdwardsPoint,
    pub versions: String,
    pub expiry: u64,
    pub signature: Signature,
}

impl ClientProfile {
    /// Build and self-sign a profile (client side; the server only
    /// validates).
    pub fn new_signed(
        keypair: &Keypair,
        forging_key: EdwardsPoint,
        instance_tag: u32,
        versions: &str,
        expiry: u64,
    ) -> Self {
        let mut profile = Self {
            instance_tag,
            public_key: keypair.public(),
            forging_key,
            versions: versions.to_string(),
            expiry,
            signature: eddsa::sign(keypair, b""),
        };
        profile.signature = eddsa::sign(keypair, &profile.signable_bytes());
        profile
    }

    /// Canonical serialization of every field the signature covers.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_u32(self.instance_tag)
            .write_point(&self.public_key)
            .write_point(&self.forging_key)
            .write_data(self.versions.as_bytes())
            .write_timestamp(self.expiry);
        enc.finish()
    }

    /// Validate the profile: tag, self-signature, expiry, version set.
    pub fn validate(&self, expected_tag: u32, now: u64) -> Result<(), ProtocolError> {
        if self.instance_tag != expected_tag {
            return Err(ProtocolError::InvalidClientProfile(
                ProfileFault::WrongInstanceTag,
            ));
        }
        if !eddsa::verify(&self.public_key, &self.signable_bytes(), &self.signature) {
            return Err(ProtocolError::InvalidClientProfile(
                ProfileFault::BadSignature,
            ));
        }
        if self.expiry <= now {
            return Err(ProtocolError::InvalidClientProfile(ProfileFault::Expired));
        }
        if !self.versions.contains(REQUIRED_VERSION) {
            return Err(ProtocolError::InvalidClientProfile(
                ProfileFault::VersionUnsupported,
            ));
        }
        Ok(())
    }

    pub fn encode_to(&self, enc: &mut Encoder) {
        enc.write_raw(&self.signable_bytes());
        enc.write_raw(&self.signature.to_bytes());
    }

    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        let instance_tag = dec.read_u32()?;
        let public_key = dec.read_point()?;
        let forging_key = dec.read_point()?;
        let versions =
            String::from_utf8(dec.read_data()?).map_err(|_| ProtocolError::InvalidUtf8)?;
        let expiry = dec.read_timestamp()?;
        let signature = Signature::from_bytes(&dec.read_bytes(SIGNATURE_LEN)?)?;
        Ok(Self {
            instance_tag,
            public_key,
            forging_key,
            versions,
            expiry,
            signature,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_to(&mut enc);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        let profile = Self::decode_from(&mut dec)?;
        dec.expect_end()?;
        Ok(profile)
    }
}

/// A client's signed medium-term shared-prekey statement.
///
/// Signed by the client's long-term key; validation therefore takes the
/// signer's public key (from the accompanying client profile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyProfile {
    pub instance_tag: u32,
    pub expiry: u64,
    pub shared_prekey: EdwardsPoint,
    pub signature: Signature,
}

impl PrekeyProfile {
    pub fn new_signed(
        keypair: &Keypair,
        instance_tag: u32,
        expiry: u64,
        shared_prekey: EdwardsPoint,
    ) -> Self {
        let mut profile = Self {
            instance_tag,
            expiry,
            shared_prekey,
            signature: eddsa::sign(keypair, b""),
        };
        profile.signature = eddsa::sign(keypair, &profile.signable_bytes());
        profile
    }

    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.write_u32(self.instance_tag)
            .write_timestamp(self.expiry)
            .write_point(&self.shared_prekey);
        enc.finish()
    }

    /// Validate tag, signature (against the owning client's long-term
    /// key), expiry, and that the shared prekey is not degenerate.
    pub fn validate(
        &self,
        expected_tag: u32,
        now: u64,
        signer: &EdwardsPoint,
    ) -> Result<(), ProtocolError> {
        if self.instance_tag != expected_tag {
            return Err(ProtocolError::InvalidPrekeyProfile(
                ProfileFault::WrongInstanceTag,
            ));
        }
        if !eddsa::verify(signer, &self.signable_bytes(), &self.signature) {
            return Err(ProtocolError::InvalidPrekeyProfile(
                ProfileFault::BadSignature,
            ));
        }
        if self.expiry <= now {
            return Err(ProtocolError::InvalidPrekeyProfile(ProfileFault::Expired));
        }
        if validate_point(&self.shared_prekey).is_err() {
            return Err(ProtocolError::InvalidPrekeyProfile(
                ProfileFault::DegenerateSharedPrekey,
            ));
        }
        Ok(())
    }

    pub fn encode_to(&self, enc: &mut Encoder) {
        enc.write_raw(&self.signable_bytes());
        enc.write_raw(&self.signature.to_bytes());
    }

    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        let instance_tag = dec.read_u32()?;
        let expiry = dec.read_timestamp()?;
        let shared_prekey = dec.read_point()?;
        let signature = Signature::from_bytes(&dec.read_bytes(SIGNATURE_LEN)?)?;
        Ok(Self {
            instance_tag,
            expiry,
            shared_prekey,
            signature,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_to(&mut enc);
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut dec = Decoder::new(bytes);
        let profile = Self::decode_from(&mut dec)?;
        dec.expect_end()?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    const FAR_FUTURE: u64 = 4_102_444_800; // 2100-01-01
    const NOW: u64 = 1_700_000_000;

    fn client_profile(keypair: &Keypair, tag: u32) -> ClientProfile {
        let forger = Keypair::generate(&mut OsRng);
        ClientProfile::new_signed(keypair, forger.public(), tag, "4", FAR_FUTURE)
    }

    #[test]
    fn client_profile_validates() {
        let kp = Keypair::generate(&mut OsRng);
        let profile = client_profile(&kp, 0x1234_5678);
        assert!(profile.validate(0x1234_5678, NOW).is_ok());
    }

    #[test]
    fn client_profile_rejects_wrong_tag() {
        let kp = Keypair::generate(&mut OsRng);
        let profile = client_profile(&kp, 1);
        assert_eq!(
            profile.validate(2, NOW).unwrap_err(),
            ProtocolError::InvalidClientProfile(ProfileFault::WrongInstanceTag)
        );
    }

    #[test]
    fn client_profile_rejects_tampered_fields() {
        let kp = Keypair::generate(&mut OsRng);
        let mut profile = client_profile(&kp, 1);
        profile.versions = "34".to_string();
        assert_eq!(
            profile.validate(1, NOW).unwrap_err(),
            ProtocolError::InvalidClientProfile(ProfileFault::BadSignature)
        );
    }

    #[test]
    fn client_profile_rejects_expired() {
        let kp = Keypair::generate(&mut OsRng);
        let forger = Keypair::generate(&mut OsRng);
        let profile = ClientProfile::new_signed(&kp, forger.public(), 1, "4", NOW - 10);
        assert_eq!(
            profile.validate(1, NOW).unwrap_err(),
            ProtocolError::InvalidClientProfile(ProfileFault::Expired)
        );
    }

    #[test]
    fn client_profile_rejects_missing_version() {
        let kp = Keypair::generate(&mut OsRng);
        let forger = Keypair::generate(&mut OsRng);
        let profile = ClientProfile::new_signed(&kp, forger.public(), 1, "3", FAR_FUTURE);
        assert_eq!(
            profile.validate(1, NOW).unwrap_err(),
            ProtocolError::InvalidClientProfile(ProfileFault::VersionUnsupported)
        );
    }

    #[test]
    fn client_profile_roundtrip() {
        let kp = Keypair::generate(&mut OsRng);
        let profile = client_profile(&kp, 42);
        let decoded = ClientProfile::decode(&profile.encode()).unwrap();
        assert_eq!(decoded, profile);
        assert!(decoded.validate(42, NOW).is_ok());
    }

    #[test]
    fn prekey_profile_validates_and_roundtrips() {
        let kp = Keypair::generate(&mut OsRng);
        let shared = Keypair::generate(&mut OsRng);
        let profile = PrekeyProfile::new_signed(&kp, 7, FAR_FUTURE, shared.public());
        assert!(profile.validate(7, NOW, &kp.public()).is_ok());

        let decoded = PrekeyProfile::decode(&profile.encode()).unwrap();
        assert_eq!(decoded, profile);
    }

    #[test]
    fn prekey_profile_rejects_foreign_signer() {
        let kp = Keypair::generate(&mut OsRng);
        let other = Keypair::generate(&mut OsRng);
        let shared = Keypair::generate(&mut OsRng);
        let profile = PrekeyProfile::new_signed(&kp, 7, FAR_FUTURE, shared.public());
        assert_eq!(
            profile.validate(7, NOW, &other.public()).unwrap_err(),
            ProtocolError::InvalidPrekeyProfile(ProfileFault::BadSignature)
        );
    }

    #[test]
    fn profile_decode_rejects_truncation() {
        let kp = Keypair::generate(&mut OsRng);
        let bytes = client_profile(&kp, 1).encode();
        let result = ClientProfile::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::Truncated { .. })));
    }
}
