//! # typhon-gate
//!
//! The guards at Typhon's front door:
//!
//! - [`AdmissionController`]: a fixed-window per-client rate limiter. No
//!   queuing, no backoff hints; a throttled caller retries after the window
//!   rolls over.
//! - [`CaptchaClient`]: a synchronous call-out to the upstream captcha
//!   verifier. Fail-open on transport and parse failures, fail-closed on a
//!   well-formed rejection; the policy is an explicit mapping on
//!   [`CaptchaVerdict`], not an implicit default.
//!
//! Both are handle types meant to live in the application state and be
//! consulted per request by whatever layer fronts them.

mod admission;
mod captcha;

pub use admission::{Admission, AdmissionConfig, AdmissionController};
pub use captcha::{sign_token, CaptchaClient, CaptchaConfig, CaptchaError, CaptchaProof, CaptchaVerdict};
