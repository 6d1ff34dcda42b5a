//! Authentication messages and password hashing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;

/// SASL mechanism name for SCRAM-SHA-256.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding".
const GS2_HEADER: &str = "n,,";

/// Iteration count for verifiers built on the client, as libpq uses.
const SCRAM_ITERATIONS: u32 = 4096;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.cstr(password);
    msg.finish();
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.cstr(mechanism)
        .i32(initial_response.len() as i32)
        .bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.bytes(response);
    msg.finish();
}

/// `"md5" + md5(md5(password + username) + salt)`, hex encoded.
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::Md5;

    let inner = Md5::new()
        .chain_update(password.as_bytes())
        .chain_update(username.as_bytes())
        .finalize();
    let outer = Md5::new()
        .chain_update(format!("{inner:x}").as_bytes())
        .chain_update(salt)
        .finalize();
    format!("md5{outer:x}")
}

/// Hash a password the way the server stores it, for use in
/// `ALTER ROLE .. PASSWORD '...'` without sending the cleartext.
///
/// `algorithm` is a `password_encryption` value: `scram-sha-256`, or `md5`
/// (the legacy `on` and `off` also mean md5).
pub fn encrypt_password(user: &str, password: &str, algorithm: &str) -> Result<String> {
    use rand::Rng;

    match algorithm {
        "scram-sha-256" => {
            let mut salt = [0u8; 16];
            rand::rng().fill(&mut salt);
            scram_verifier(password, &salt, SCRAM_ITERATIONS)
        }
        "md5" | "on" | "off" => {
            let digest = md5::Md5::new()
                .chain_update(password.as_bytes())
                .chain_update(user.as_bytes())
                .finalize();
            Ok(format!("md5{digest:x}"))
        }
        other => Err(Error::Argument(format!(
            "Unrecognized password encryption algorithm \"{other}\"."
        ))),
    }
}

/// `SCRAM-SHA-256$<iterations>:<salt>$<StoredKey>:<ServerKey>`
fn scram_verifier(password: &str, salt: &[u8], iterations: u32) -> Result<String> {
    let mut salted = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut salted);
    let stored_key = Sha256::digest(hmac_sha256(&salted, b"Client Key")?);
    let server_key = hmac_sha256(&salted, b"Server Key")?;
    Ok(format!(
        "{SCRAM_SHA_256}${iterations}:{}${}:{}",
        BASE64.encode(salt),
        BASE64.encode(stored_key),
        BASE64.encode(server_key)
    ))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| Error::Auth(format!("HMAC error: {e}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Client side of a SCRAM-SHA-256 exchange without channel binding.
///
/// The username is sent empty; the server uses the one from the startup
/// message.
pub struct ScramClient {
    password: String,
    nonce: String,
    /// Server signature we expect in server-final-message, known once the
    /// server-first-message has been processed.
    expected_server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            password: password.to_string(),
            nonce,
            expected_server_signature: None,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// The client-first-message.
    pub fn client_first_message(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare())
    }

    /// Consume server-first-message (`r=..,s=..,i=..`) and produce the
    /// client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => {}
            }
        }
        let nonce = nonce.ok_or_else(|| Error::Auth("server-first-message lacks nonce".into()))?;
        let salt = salt.ok_or_else(|| Error::Auth("server-first-message lacks salt".into()))?;
        let iterations = iterations
            .ok_or_else(|| Error::Auth("server-first-message lacks iteration count".into()))?;
        if !nonce.starts_with(&self.nonce) {
            return Err(Error::Auth("server nonce does not extend client nonce".into()));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|e| Error::Auth(format!("invalid salt: {e}")))?;

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);
        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted, b"Server Key")?;
        self.expected_server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes())?);

        Ok(format!("{without_proof},p={}", BASE64.encode(proof)))
    }

    /// Check the server's proof in server-final-message (`v=..`).
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::Auth(format!("server rejected SCRAM exchange: {err}")));
        }
        let signature = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::Auth("malformed server-final-message".into()))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|e| Error::Auth(format!("invalid server signature: {e}")))?;
        let expected = self
            .expected_server_signature
            .ok_or_else(|| Error::Auth("server-final-message before server-first-message".into()))?;
        if signature.as_slice() != expected.as_slice() {
            return Err(Error::Auth("server signature mismatch".into()));
        }
        Ok(())
    }
}
