//! Client side of the SCRAM-SHA-256 exchange (RFC 5802 / RFC 7677),
//! the only password authentication method the server offers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use edgedb_errors::{AuthenticationError, Error, ErrorKind};

pub(crate) const SCRAM_METHOD: &str = "SCRAM-SHA-256";

const NONCE_LENGTH: usize = 18;

pub(crate) struct ScramClient {
    nonce: String,
    first_bare: String,
    password: String,
}

/// Checks the server signature sent in `SCRAM-SHA-256` final message.
#[derive(Debug)]
pub(crate) struct ScramVerifier {
    server_sig: [u8; 32],
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> ScramClient {
        let raw: [u8; NONCE_LENGTH] = rand::random();
        ScramClient::with_nonce(username, password, &BASE64.encode(raw))
    }

    pub fn with_nonce(username: &str, password: &str, nonce: &str) -> ScramClient {
        let first_bare = format!("n={},r={}", escape_username(&saslprep(username)), nonce);
        ScramClient {
            nonce: nonce.into(),
            first_bare,
            password: saslprep(password),
        }
    }

    pub fn client_first(&self) -> String {
        // "n,," is the GS2 header: no channel binding, no authzid
        format!("n,,{}", self.first_bare)
    }

    /// Consumes the server-first message and produces the client-final
    /// message along with the verifier for the server's signature.
    pub fn handle_server_first(
        &self,
        server_first: &str,
    ) -> Result<(String, ScramVerifier), Error> {
        let server_nonce = get_field(server_first, 'r')
            .ok_or_else(|| auth_error("missing nonce in server-first message"))?;
        if !server_nonce.starts_with(&self.nonce) {
            return Err(auth_error("server nonce does not extend the client nonce"));
        }
        let salt = get_field(server_first, 's')
            .ok_or_else(|| auth_error("missing salt in server-first message"))?;
        let salt = BASE64
            .decode(salt)
            .map_err(|_| auth_error("salt is not valid base64"))?;
        let iterations: u32 = get_field(server_first, 'i')
            .and_then(|i| i.parse().ok())
            .filter(|&i| i > 0)
            .ok_or_else(|| auth_error("invalid iteration count"))?;

        let salted = hi(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let without_proof = format!("c=biws,r={server_nonce}");
        let auth_message = format!("{},{},{}", self.first_bare, server_first, without_proof);
        let client_sig = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_sig) {
            *p ^= s;
        }

        let server_key = hmac(&salted, b"Server Key");
        let server_sig = hmac(&server_key, auth_message.as_bytes());

        Ok((
            format!("{},p={}", without_proof, BASE64.encode(proof)),
            ScramVerifier { server_sig },
        ))
    }
}

impl ScramVerifier {
    pub fn verify(&self, server_final: &str) -> Result<(), Error> {
        if let Some(err) = get_field(server_final, 'e') {
            return Err(auth_error(format!("server rejected authentication: {err}")));
        }
        let signature = get_field(server_final, 'v')
            .ok_or_else(|| auth_error("missing signature in server-final message"))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|_| auth_error("server signature is not valid base64"))?;
        if !constant_time_eq(&signature, &self.server_sig) {
            return Err(auth_error("server signature mismatch"));
        }
        Ok(())
    }
}

pub(crate) fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take a key of any size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// The `Hi` function: PBKDF2 over HMAC-SHA-256 with a single block.
pub(crate) fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(password).expect("HMAC can take a key of any size");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut prev: [u8; 32] = mac.finalize().into_bytes().into();
    let mut result = prev;
    for _ in 1..iterations {
        prev = hmac(password, &prev);
        for (r, p) in result.iter_mut().zip(prev) {
            *r ^= p;
        }
    }
    result
}

fn saslprep(value: &str) -> String {
    value.nfkc().collect()
}

fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn get_field<'a>(message: &'a str, key: char) -> Option<&'a str> {
    message.split(',').find_map(|field| {
        let mut chars = field.chars();
        (chars.next() == Some(key) && chars.next() == Some('=')).then(|| &field[2..])
    })
}

fn auth_error(message: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    AuthenticationError::with_message(message)
}
