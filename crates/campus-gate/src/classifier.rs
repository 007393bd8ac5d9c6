//! Request classification
//!
//! Decides whether a request skips gatekeeping. Exempt when:
//! - the path sits under a configured health/internal prefix
//! - it carries a valid signed platform-probe marker (`x-campus-probe`)
//! - the deployment is a preview explicitly configured to bypass
//!
//! The classifier holds only configuration and has no side effects.

use crate::config::{Environment, GatekeeperConfig};
use campus_common::RequestMeta;
use campus_ratelimit::path_has_prefix;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signed probe header: `<unix seconds>.<hex hmac-sha256 of "<ts>:<path>">`
pub const PROBE_HEADER: &str = "x-campus-probe";

/// Why a request is exempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ExemptReason {
    /// Matched this configured prefix
    Path(String),
    /// Carried a valid signed probe marker
    TrustedProbe,
    /// Preview deployment with the bypass enabled
    PreviewBypass,
}

/// Outcome of [`RequestClassifier::classify`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Skips gatekeeping
    pub exempt: bool,
    /// Why, when exempt
    pub reason: Option<ExemptReason>,
}

impl Classification {
    /// Not exempt
    pub fn gated() -> Self {
        Self {
            exempt: false,
            reason: None,
        }
    }

    fn exempt(reason: ExemptReason) -> Self {
        Self {
            exempt: true,
            reason: Some(reason),
        }
    }
}

/// HMAC verifier for platform probe markers
#[derive(Clone)]
pub struct ProbeVerifier {
    secret: Vec<u8>,
    max_skew_secs: i64,
}

impl std::fmt::Debug for ProbeVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeVerifier")
            .field("max_skew_secs", &self.max_skew_secs)
            .finish_non_exhaustive()
    }
}

impl ProbeVerifier {
    /// Verifier for `secret`, accepting timestamps within `max_skew_secs`
    pub fn new(secret: &str, max_skew_secs: u64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            max_skew_secs: max_skew_secs.min(i64::MAX as u64) as i64,
        }
    }

    fn mac(&self, timestamp: i64, path: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).ok()?;
        mac.update(format!("{}:{}", timestamp, path).as_bytes());
        Some(mac)
    }

    /// Header value for a probe of `path` at `at`
    pub fn sign(&self, path: &str, at: DateTime<Utc>) -> Option<String> {
        let timestamp = at.timestamp();
        let mac = self.mac(timestamp, path)?;
        Some(format!("{}.{}", timestamp, hex::encode(mac.finalize().into_bytes())))
    }

    /// Signature matches and the timestamp is within the allowed skew
    pub fn verify(&self, header: &str, path: &str, now: DateTime<Utc>) -> bool {
        let Some((ts, signature)) = header.trim().split_once('.') else {
            return false;
        };
        let Ok(timestamp) = ts.parse::<i64>() else {
            return false;
        };
        if (now.timestamp() - timestamp).abs() > self.max_skew_secs {
            return false;
        }
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        match self.mac(timestamp, path) {
            Some(mac) => mac.verify_slice(&signature).is_ok(),
            None => false,
        }
    }
}

/// Exemption rules
#[derive(Debug, Clone)]
pub struct RequestClassifier {
    exempt_prefixes: Vec<String>,
    probe: Option<ProbeVerifier>,
    preview_bypass: bool,
}

impl RequestClassifier {
    /// Classifier from explicit parts
    pub fn new(
        exempt_prefixes: Vec<String>,
        probe: Option<ProbeVerifier>,
        environment: Environment,
        preview_bypass: bool,
    ) -> Self {
        // preview bypass is only ever honoured outside production
        let preview_bypass = preview_bypass && environment == Environment::Preview;
        Self {
            exempt_prefixes,
            probe,
            preview_bypass,
        }
    }

    /// Classifier from the exemption section of `config`
    pub fn from_config(config: &GatekeeperConfig) -> Self {
        let probe = config
            .exemptions
            .probe_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
            .map(|secret| ProbeVerifier::new(secret, config.exemptions.probe_max_skew_secs));
        Self::new(
            config.exemptions.path_prefixes.clone(),
            probe,
            config.environment,
            config.exemptions.preview_bypass,
        )
    }

    /// Decide whether `request` skips gatekeeping
    pub fn classify(&self, request: &RequestMeta, now: DateTime<Utc>) -> Classification {
        if self.preview_bypass {
            return Classification::exempt(ExemptReason::PreviewBypass);
        }

        if let Some(prefix) = self
            .exempt_prefixes
            .iter()
            .find(|prefix| path_has_prefix(&request.path, prefix))
        {
            return Classification::exempt(ExemptReason::Path(prefix.clone()));
        }

        if let (Some(probe), Some(marker)) = (&self.probe, request.header_trimmed(PROBE_HEADER)) {
            if probe.verify(marker, &request.path, now) {
                return Classification::exempt(ExemptReason::TrustedProbe);
            }
        }

        Classification::gated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn classifier(probe: Option<ProbeVerifier>) -> RequestClassifier {
        RequestClassifier::new(
            vec!["/health".into(), "/internal/".into()],
            probe,
            Environment::Production,
            false,
        )
    }

    #[test]
    fn test_path_prefixes_match_on_segments() {
        let c = classifier(None);
        let now = Utc::now();
        assert!(c.classify(&RequestMeta::new("GET", "/health"), now).exempt);
        assert!(c.classify(&RequestMeta::new("GET", "/internal/metrics"), now).exempt);
        assert!(!c.classify(&RequestMeta::new("GET", "/healthz-admin"), now).exempt);
        assert!(!c.classify(&RequestMeta::new("GET", "/api/v1/students"), now).exempt);
    }

    #[test]
    fn test_probe_requires_valid_signature() {
        let verifier = ProbeVerifier::new("s3cret", 30);
        let c = classifier(Some(verifier.clone()));
        let now = Utc::now();
        let path = "/api/v1/students";

        let signed = verifier.sign(path, now).unwrap();
        let request = RequestMeta::new("GET", path).with_header(PROBE_HEADER, signed.clone());
        assert_eq!(
            c.classify(&request, now).reason,
            Some(ExemptReason::TrustedProbe)
        );

        // claimed header without a valid signature
        let forged = RequestMeta::new("GET", path).with_header(PROBE_HEADER, "1700000000.deadbeef");
        assert!(!c.classify(&forged, now).exempt);

        // signature for another path
        let other = RequestMeta::new("GET", "/api/v1/usage/students").with_header(PROBE_HEADER, signed);
        assert!(!c.classify(&other, now).exempt);
    }

    #[test]
    fn test_probe_rejects_stale_timestamp() {
        let verifier = ProbeVerifier::new("s3cret", 30);
        let now = Utc::now();
        let signed = verifier.sign("/x", now - Duration::seconds(31)).unwrap();
        assert!(!verifier.verify(&signed, "/x", now));
        assert!(verifier.verify(&signed, "/x", now - Duration::seconds(5)));
    }

    #[test]
    fn test_preview_bypass_never_in_production() {
        let request = RequestMeta::new("GET", "/api/v1/students");
        let now = Utc::now();

        let prod = RequestClassifier::new(vec![], None, Environment::Production, true);
        assert!(!prod.classify(&request, now).exempt);

        let dev = RequestClassifier::new(vec![], None, Environment::Development, true);
        assert!(!dev.classify(&request, now).exempt);

        let preview = RequestClassifier::new(vec![], None, Environment::Preview, true);
        assert_eq!(
            preview.classify(&request, now).reason,
            Some(ExemptReason::PreviewBypass)
        );
    }
}
