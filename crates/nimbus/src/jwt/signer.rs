use crate::error::Result;

/// Size of a `SHA-256` digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Size of the signature buffer in bytes, enough for a `RSA-2048`
/// signature.
pub const SIGNATURE_SIZE: usize = 256;

/// A signing backend for token digests.
///
/// The generator hashes the token payload with `SHA-256` and hands the
/// digest to the signer, so a backend only implements the signature
/// primitive, usually through a hardware accelerator or a vendor library.
pub trait Signer {
    /// Returns the `JWT` algorithm name, such as `RS256`.
    fn algorithm(&self) -> &'static str;

    /// Signs `digest` with `private_key` and writes the signature into
    /// `signature`, which holds [`SIGNATURE_SIZE`] bytes.
    ///
    /// Returns the length of the signature.
    ///
    /// # Errors
    ///
    /// The private key cannot be parsed or the signature cannot be computed.
    fn sign(
        &mut self,
        private_key: &str,
        digest: &[u8; DIGEST_SIZE],
        signature: &mut [u8],
    ) -> Result<usize>;
}

impl<S: Signer + ?Sized> Signer for &mut S {
    fn algorithm(&self) -> &'static str {
        (**self).algorithm()
    }

    fn sign(
        &mut self,
        private_key: &str,
        digest: &[u8; DIGEST_SIZE],
        signature: &mut [u8],
    ) -> Result<usize> {
        (**self).sign(private_key, digest, signature)
    }
}
