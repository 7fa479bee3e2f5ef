//! DAKE transcripts and key derivation.
//!
//! The two ring signatures in a DAKE run sign direction-tagged
//! transcripts binding the client profile, the server's composite
//! identity, both ephemeral points, and the deployment's phi context.
//! The shared secret and MAC key come out of the ECDH point through
//! domain-separated derivations.

use keyloft_crypto::kdf::{kdf, kdf_64, UsageId};
use keyloft_crypto::keys::encode_point;
use keyloft_crypto::EdwardsPoint;
use keyloft_protocol::ClientProfile;

/// Transcript direction for the server's DAKE2 signature.
pub const SIDE_INITIATOR: u8 = 0x00;
/// Transcript direction for the client's DAKE3 signature.
pub const SIDE_RECEIVER: u8 = 0x01;

/// Build the transcript a DAKE ring signature covers.
///
/// `i` is the client's ephemeral point, `s` the server's; the side byte
/// and per-side usage labels keep the two directions from ever producing
/// the same bytes.
pub fn transcript(
    side: u8,
    profile: &ClientProfile,
    composite_identity: &[u8],
    i: &EdwardsPoint,
    s: &EdwardsPoint,
    phi: &[u8],
) -> Vec<u8> {
    let (profile_usage, identity_usage, phi_usage) = if side == SIDE_INITIATOR {
        (
            UsageId::InitiatorClientProfile,
            UsageId::InitiatorCompositeIdentity,
            UsageId::InitiatorPhi,
        )
    } else {
        (
            UsageId::ReceiverClientProfile,
            UsageId::ReceiverCompositeIdentity,
            UsageId::ReceiverPhi,
        )
    };

    let mut t = vec![side];
    t.extend_from_slice(&kdf(profile_usage, 64, &[&profile.encode()]));
    t.extend_from_slice(&kdf(identity_usage, 64, &[composite_identity]));
    t.extend_from_slice(&encode_point(i));
    t.extend_from_slice(&encode_point(s));
    t.extend_from_slice(&kdf(phi_usage, 64, &[phi]));
    t
}

/// Derive the MAC key from the DAKE ECDH point: first the shared secret,
/// then the MAC key from it.
pub fn derive_mac_key(ecdh: &EdwardsPoint) -> [u8; 64] {
    let shared_secret = kdf_64(UsageId::SharedSecret, &[&encode_point(ecdh)]);
    kdf_64(UsageId::PreMacKey, &[&shared_secret])
}
