//! RSA key pair for signing the plane's own JWTs.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;

use manifold_core::{Error, Result};

/// RSA key pair for JWT signing and JWKS publication.
pub struct SigningKeyPair {
    encoding_key: EncodingKey,
    /// Base64url-encoded RSA modulus (for JWKS).
    n: String,
    /// Base64url-encoded RSA public exponent (for JWKS).
    e: String,
    /// Key ID.
    kid: String,
}

impl SigningKeyPair {
    /// Generate a new RSA-2048 key pair.
    pub fn generate(kid: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| Error::unspecified(format!("generate RSA key: {e}")))?;
        let pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| Error::unspecified(format!("export RSA key: {e}")))?;
        Self::from_pkcs8_pem(&pem, kid)
    }

    /// Load a key pair from a PKCS8 PEM private key.
    pub fn from_pkcs8_pem(pem: &str, kid: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::unspecified(format!("parse RSA key: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::unspecified(format!("build encoding key: {e}")))?;
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        Ok(Self {
            encoding_key,
            n,
            e,
            kid: kid.to_string(),
        })
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Returns the decoding key for validating our own JWTs.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        DecodingKey::from_rsa_components(&self.n, &self.e)
            .map_err(|e| Error::unspecified(format!("build decoding key: {e}")))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The JWKS document exposing the public half.
    pub fn jwks_json(&self) -> JwksDocument<'_> {
        JwksDocument {
            keys: vec![JwkEntry {
                kty: "RSA",
                alg: "RS256",
                r#use: "sig",
                kid: &self.kid,
                n: &self.n,
                e: &self.e,
            }],
        }
    }
}

/// JWKS response body.
#[derive(Serialize)]
pub struct JwksDocument<'a> {
    pub keys: Vec<JwkEntry<'a>>,
}

/// A single JWK entry in a JWKS response.
#[derive(Serialize)]
pub struct JwkEntry<'a> {
    pub kty: &'a str,
    pub alg: &'a str,
    #[serde(rename = "use")]
    pub r#use: &'a str,
    pub kid: &'a str,
    pub n: &'a str,
    pub e: &'a str,
}
