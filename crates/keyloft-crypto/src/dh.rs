//! The finite-field Diffie-Hellman group.
//!
//! RFC 3526 3072-bit MODP group with generator 2. The modulus is a safe
//! prime, so the subgroup generated by 2 has prime order q = (p - 1) / 2;
//! membership is checked by the exponentiation test. Fermat inversion
//! (`x^(p-2) mod p`) requires a prime modulus and a nonzero residue —
//! both are guaranteed here: p is a vetted protocol constant and
//! [`mod_inverse`] rejects zero residues.

use num_bigint::BigUint;
use num_traits::One;
use rand::{CryptoRng, RngCore};
use std::sync::OnceLock;

use crate::error::CryptoError;

/// RFC 3526, group 15 (3072-bit MODP).
const MODULUS_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
83655D23DCA3AD961C62F356208552BB9ED529077096966D\
670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64\
ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B\
F12FFA06D98A0864D87602733EC86A64521F2B18177B200C\
BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31\
43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

/// The group modulus p.
pub fn modulus() -> &'static BigUint {
    static P: OnceLock<BigUint> = OnceLock::new();
    P.get_or_init(|| {
        BigUint::parse_bytes(MODULUS_HEX.as_bytes(), 16).expect("modulus constant is valid hex")
    })
}

/// The group generator, 2.
pub fn generator() -> &'static BigUint {
    static G: OnceLock<BigUint> = OnceLock::new();
    G.get_or_init(|| BigUint::from(2u8))
}

/// Order of the prime-order subgroup, q = (p - 1) / 2.
pub fn subgroup_order() -> &'static BigUint {
    static Q: OnceLock<BigUint> = OnceLock::new();
    Q.get_or_init(|| (modulus() - BigUint::one()) >> 1)
}

/// Generate a DH keypair: secret exponent in [2, q), public g^secret mod p.
pub fn generate_dh_keypair<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> (BigUint, BigUint) {
    use num_bigint::RandBigInt;
    let secret = rng.gen_biguint_range(&BigUint::from(2u8), subgroup_order());
    let public = generator().modpow(&secret, modulus());
    (secret, public)
}

/// Validate a received group element.
///
/// Rejects values below the generator or above p - 2 (covers 0, 1 and
/// p - 1, the degenerate elements), then rejects anything outside the
/// prime-order subgroup via the exponentiation test.
pub fn validate_dh_element(v: &BigUint) -> Result<(), CryptoError> {
    let p_minus_two = modulus() - BigUint::from(2u8);
    if v < generator() || *v > p_minus_two {
        return Err(CryptoError::DhElementOutOfRange);
    }
    if !v.modpow(subgroup_order(), modulus()).is_one() {
        return Err(CryptoError::DhElementNotInSubgroup);
    }
    Ok(())
}

/// Modular exponentiation in the group.
pub fn dh_exp(base: &BigUint, exponent: &BigUint) -> BigUint {
    base.modpow(exponent, modulus())
}

/// Modular inverse via Fermat's little theorem.
///
/// Valid only because p is prime; a zero residue has no inverse and is
/// rejected.
pub fn mod_inverse(x: &BigUint) -> Result<BigUint, CryptoError> {
    let reduced = x % modulus();
    if reduced.bits() == 0 {
        return Err(CryptoError::NoModularInverse);
    }
    let exponent = modulus() - BigUint::from(2u8);
    Ok(reduced.modpow(&exponent, modulus()))
}
