//! Authentication messages and the SCRAM-SHA-256 client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use crate::protocol::codec::MessageBuilder;

/// Write a PasswordMessage (cleartext or MD5 hashed password).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Compute the MD5 password response.
///
/// Format: `"md5" + hex(md5(hex(md5(password || user)) || salt))`
pub fn md5_password(username: &str, password: &str, salt: &[u8; 4]) -> String {
    use md5::{Digest, Md5};

    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(username.as_bytes());
    let inner = format!("{:x}", hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{:x}", hasher.finalize())
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial_response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(initial_response.len() as i32);
    msg.write_bytes(initial_response);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, response: &[u8]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PASSWORD);
    msg.write_bytes(response);
    msg.finish();
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| format!("HMAC error: {e}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// SCRAM-SHA-256 client (RFC 5802), with optional tls-server-end-point
/// channel binding for SCRAM-SHA-256-PLUS.
pub struct ScramClient {
    /// Client nonce
    nonce: String,
    /// GS2 header ("n,," or "p=tls-server-end-point,,")
    gs2_header: String,
    /// Channel binding data (TLS certificate hash) when bound
    channel_binding_data: Option<Vec<u8>>,
    /// Password
    password: String,
    /// AuthMessage for signature verification
    auth_message: Option<String>,
    /// Salted password for server signature verification
    salted_password: Option<[u8; 32]>,
}

impl ScramClient {
    /// Create a new SCRAM client without channel binding.
    pub fn new(password: &str) -> Self {
        Self::with_nonce(password, Self::random_nonce(), None)
    }

    /// Create a new SCRAM client bound to the TLS server certificate.
    pub fn new_with_channel_binding(password: &str, certificate_hash: &[u8]) -> Self {
        Self::with_nonce(
            password,
            Self::random_nonce(),
            Some(certificate_hash.to_vec()),
        )
    }

    fn with_nonce(password: &str, nonce: String, channel_binding_data: Option<Vec<u8>>) -> Self {
        let gs2_header = if channel_binding_data.is_some() {
            "p=tls-server-end-point,,".to_string()
        } else {
            "n,,".to_string()
        };
        Self {
            nonce,
            gs2_header,
            channel_binding_data,
            password: password.to_string(),
            auth_message: None,
            salted_password: None,
        }
    }

    fn random_nonce() -> String {
        use rand::Rng;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        BASE64.encode(nonce_bytes)
    }

    /// The mechanism name this client negotiates.
    pub fn mechanism(&self) -> &'static str {
        if self.channel_binding_data.is_some() {
            "SCRAM-SHA-256-PLUS"
        } else {
            "SCRAM-SHA-256"
        }
    }

    /// Generate the client-first-message.
    ///
    /// The username is empty; PostgreSQL takes it from the startup packet.
    pub fn client_first_message(&self) -> String {
        format!("{}n=,r={}", self.gs2_header, self.nonce)
    }

    fn client_first_message_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// The `c=` attribute: base64 of the GS2 header plus any binding data.
    fn channel_binding_attribute(&self) -> String {
        let mut input = self.gs2_header.as_bytes().to_vec();
        if let Some(data) = &self.channel_binding_data {
            input.extend_from_slice(data);
        }
        BASE64.encode(input)
    }

    /// Process server-first-message and generate client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String, String> {
        // server-first-message: r=<nonce>,s=<salt>,i=<iterations>
        let mut combined_nonce = None;
        let mut salt_b64 = None;
        let mut iterations = None;

        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt_b64 = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse().ok();
            }
        }

        let combined_nonce = combined_nonce.ok_or("missing nonce in server-first-message")?;
        let salt_b64 = salt_b64.ok_or("missing salt in server-first-message")?;
        let iterations: u32 = iterations.ok_or("missing iterations in server-first-message")?;

        if !combined_nonce.starts_with(&self.nonce) {
            return Err("server nonce does not extend client nonce".to_string());
        }

        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| format!("invalid salt: {e}"))?;

        // SaltedPassword = Hi(Normalize(password), salt, iterations)
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );
        self.salted_password = Some(salted_password);

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);

        let client_final_without_proof =
            format!("c={},r={}", self.channel_binding_attribute(), combined_nonce);

        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare(),
            server_first,
            client_final_without_proof
        );
        self.auth_message = Some(auth_message.clone());

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;

        // ClientProof = ClientKey XOR ClientSignature
        let mut client_proof = [0u8; 32];
        for (i, out) in client_proof.iter_mut().enumerate() {
            *out = client_key[i] ^ client_signature[i];
        }

        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(client_proof)
        ))
    }

    /// Verify the server-final-message signature.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), String> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(format!("server rejected authentication: {err}"));
        }
        let server_signature_b64 = server_final
            .strip_prefix("v=")
            .ok_or("invalid server-final-message format")?;

        let server_signature = BASE64
            .decode(server_signature_b64)
            .map_err(|e| format!("invalid server signature: {e}"))?;

        let salted_password = self.salted_password.ok_or("missing salted password")?;
        let auth_message = self.auth_message.as_ref().ok_or("missing auth message")?;

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        let expected = hmac_sha256(&server_key, auth_message.as_bytes())?;

        if server_signature.as_slice() != expected.as_slice() {
            return Err("server signature verification failed".to_string());
        }

        Ok(())
    }
}
