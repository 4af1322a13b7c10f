//! Captcha proof verification against the upstream validate endpoint.
//!
//! One form-encoded POST per verification, bounded by a short timeout, no
//! retries. The upstream being unreachable maps to [`CaptchaVerdict::Indeterminate`],
//! which the admission policy treats as accepted: an outage at the verifier
//! must never become an outage of this service. A well-formed "fail"
//! response is a real rejection and stays one.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::warn;

/// Upstream validate endpoint.
const DEFAULT_VERIFY_URL: &str = "https://gcaptcha4.geetest.com/validate";

/// Per-call upstream timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Token both `status` and `result` must equal for a pass.
const SUCCESS_TOKEN: &str = "success";

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Captcha instance identifier sent upstream.
    pub captcha_id: String,
    /// Shared secret keying the request signature.
    pub captcha_key: String,
    /// Upstream validate endpoint.
    pub verify_url: String,
    /// Upstream call timeout.
    pub timeout: Duration,
}

impl CaptchaConfig {
    pub fn new(captcha_id: impl Into<String>, captcha_key: impl Into<String>) -> Self {
        Self {
            captcha_id: captcha_id.into(),
            captcha_key: captcha_key.into(),
            verify_url: DEFAULT_VERIFY_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// The proof material a client widget submits for verification.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaProof {
    pub lot_number: String,
    pub captcha_output: String,
    pub pass_token: String,
    pub gen_time: String,
}

/// Tri-state verification outcome.
///
/// `Indeterminate` is not an error to the caller: the fail-open policy in
/// [`CaptchaVerdict::allows_entry`] maps it to admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptchaVerdict {
    Accepted,
    Rejected { reason: String },
    Indeterminate { cause: String },
}

impl CaptchaVerdict {
    /// The admission policy: fail open on anything but a real rejection.
    pub fn allows_entry(&self) -> bool {
        match self {
            CaptchaVerdict::Accepted => true,
            CaptchaVerdict::Indeterminate { .. } => true,
            CaptchaVerdict::Rejected { .. } => false,
        }
    }
}

/// Upstream response shape. Failure responses omit most fields, so
/// everything defaults to empty rather than failing the parse.
#[derive(Debug, Default, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    captcha_args: CaptchaArgs,
    #[serde(default)]
    desc: Desc,
}

#[derive(Debug, Default, Deserialize)]
struct CaptchaArgs {
    #[serde(default)]
    used_type: String,
    #[serde(default)]
    user_ip: String,
    #[serde(default)]
    lot_number: String,
    #[serde(default)]
    scene: String,
    #[serde(default)]
    referer: String,
}

#[derive(Debug, Default, Deserialize)]
struct Desc {
    #[serde(default, rename = "type")]
    kind: String,
}

/// Compute the request signature: hex HMAC-SHA256 over the challenge
/// identifier, keyed by the shared secret.
pub fn sign_token(key: &str, lot_number: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(lot_number.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Client for the upstream captcha verifier.
pub struct CaptchaClient {
    http: reqwest::Client,
    config: CaptchaConfig,
}

impl CaptchaClient {
    pub fn new(config: CaptchaConfig) -> Result<Self, CaptchaError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Verify a submitted proof for the client at `client_ip`.
    ///
    /// Exactly one upstream attempt; the caller decides whether to re-prompt
    /// the user after a rejection.
    pub async fn verify(&self, proof: &CaptchaProof, client_ip: &str) -> CaptchaVerdict {
        let sign = sign_token(&self.config.captcha_key, &proof.lot_number);
        let form = [
            ("lot_number", proof.lot_number.as_str()),
            ("captcha_output", proof.captcha_output.as_str()),
            ("pass_token", proof.pass_token.as_str()),
            ("gen_time", proof.gen_time.as_str()),
            ("captcha_id", self.config.captcha_id.as_str()),
            ("sign_token", sign.as_str()),
        ];

        let response = match self.http.post(&self.config.verify_url).form(&form).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "captcha upstream unreachable, failing open");
                return CaptchaVerdict::Indeterminate {
                    cause: error.to_string(),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "captcha upstream returned non-success status, failing open");
            return CaptchaVerdict::Indeterminate {
                cause: format!("upstream status {status}"),
            };
        }

        let body: VerifyResponse = match response.json().await {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "captcha upstream response unparseable, failing open");
                return CaptchaVerdict::Indeterminate {
                    cause: error.to_string(),
                };
            }
        };

        if body.status == SUCCESS_TOKEN && body.result == SUCCESS_TOKEN {
            return CaptchaVerdict::Accepted;
        }

        warn!(
            client_ip,
            status = %body.status,
            code = %body.code,
            msg = %body.msg,
            result = %body.result,
            reason = %body.reason,
            used_type = %body.captcha_args.used_type,
            upstream_user_ip = %body.captcha_args.user_ip,
            lot_number = %body.captcha_args.lot_number,
            scene = %body.captcha_args.scene,
            referer = %body.captcha_args.referer,
            desc_type = %body.desc.kind,
            "captcha verification rejected"
        );
        CaptchaVerdict::Rejected { reason: body.reason }
    }
}
