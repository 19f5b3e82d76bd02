//! Semantic checks on verified claims

use std::collections::HashSet;

use crate::{Error, Result, SignedClaims};

/// Audience pattern that accepts any relying party
pub const ANY_AUDIENCE: &str = "*";

/// Checks audience, expiry and issuer coherence of [`SignedClaims`].
///
/// An issuer is coherent when it is the principal's own email domain, or
/// when it appears in the secondary-issuer allowlist (a fallback or
/// load-testing IdP allowed to vouch for any domain).
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    audience: Option<String>,
    secondary_issuers: HashSet<String>,
}

impl ClaimsValidator {
    pub fn new(audience: &str) -> Self {
        let audience = (audience.trim() != ANY_AUDIENCE).then(|| normalize_audience(audience));
        Self {
            audience,
            secondary_issuers: HashSet::new(),
        }
    }

    pub fn with_secondary_issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.secondary_issuers
            .extend(issuers.into_iter().map(|s| s.as_ref().to_ascii_lowercase()));
        self
    }

    /// Run every check and report the highest-priority failure:
    /// expiry, then audience, then issuer.
    pub fn validate(&self, claims: &SignedClaims, now_millis: i64) -> Result<()> {
        let expiry = Self::check_expiry(claims, now_millis);
        let audience = self.check_audience(claims);
        let issuer = self.check_issuer(claims);
        expiry.and(audience).and(issuer)
    }

    /// The assertion must expire strictly after `now_millis`
    pub fn check_expiry(claims: &SignedClaims, now_millis: i64) -> Result<()> {
        if claims.expires_at_millis > now_millis {
            Ok(())
        } else {
            Err(Error::AssertionExpired)
        }
    }

    fn check_audience(&self, claims: &SignedClaims) -> Result<()> {
        match &self.audience {
            None => Ok(()),
            Some(expected) if *expected == normalize_audience(&claims.audience) => Ok(()),
            Some(expected) => Err(Error::AudienceMismatch {
                expected: expected.clone(),
                actual: claims.audience.clone(),
            }),
        }
    }

    fn check_issuer(&self, claims: &SignedClaims) -> Result<()> {
        let issuer = claims.issuer.to_ascii_lowercase();
        let email_domain = claims.email_domain().unwrap_or_default().to_ascii_lowercase();

        if issuer == email_domain || self.secondary_issuers.contains(&issuer) {
            Ok(())
        } else {
            Err(Error::IssuerMismatch {
                issuer: claims.issuer.clone(),
                email_domain,
            })
        }
    }
}

/// Normalize an origin for comparison: lowercase scheme and host, drop the
/// scheme's default port and any trailing slash.
pub fn normalize_audience(audience: &str) -> String {
    let audience = audience.trim().trim_end_matches('/');
    let Some((scheme, rest)) = audience.split_once("://") else {
        return audience.to_ascii_lowercase();
    };
    let scheme = scheme.to_ascii_lowercase();
    let (host, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let mut host = host.to_ascii_lowercase();

    let default_port = match scheme.as_str() {
        "https" => Some(":443"),
        "http" => Some(":80"),
        _ => None,
    };
    if let Some(port) = default_port {
        if let Some(stripped) = host.strip_suffix(port) {
            host = stripped.to_string();
        }
    }

    format!("{}://{}{}", scheme, host, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn claims(principal: &str, audience: &str, exp: i64, issuer: &str) -> SignedClaims {
        SignedClaims {
            principal: principal.into(),
            audience: audience.into(),
            expires_at_millis: exp,
            issuer: issuer.into(),
        }
    }

    #[test]
    fn test_valid_claims() {
        let v = ClaimsValidator::new("https://service.example");
        v.validate(
            &claims("user1@idp.example", "https://service.example", NOW + 1, "idp.example"),
            NOW,
        )
        .unwrap();
    }

    #[test]
    fn test_expiry_is_strict() {
        let v = ClaimsValidator::new("https://service.example");
        let c = claims("user1@idp.example", "https://service.example", NOW, "idp.example");
        assert!(matches!(v.validate(&c, NOW), Err(Error::AssertionExpired)));
    }

    #[test]
    fn test_audience_mismatch() {
        let v = ClaimsValidator::new("https://service.example");
        let c = claims("user1@idp.example", "http://other.example", NOW + 1, "idp.example");
        assert!(matches!(
            v.validate(&c, NOW),
            Err(Error::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn test_audience_normalization() {
        let v = ClaimsValidator::new("https://Service.Example:443/");
        for aud in [
            "https://service.example",
            "HTTPS://SERVICE.EXAMPLE",
            "https://service.example:443",
        ] {
            v.validate(&claims("u@idp.example", aud, NOW + 1, "idp.example"), NOW)
                .unwrap();
        }
        // scheme and port are significant
        for aud in ["http://service.example", "https://service.example:8443"] {
            assert!(v
                .validate(&claims("u@idp.example", aud, NOW + 1, "idp.example"), NOW)
                .is_err());
        }
    }

    #[test]
    fn test_wildcard_audience() {
        let v = ClaimsValidator::new("*");
        v.validate(&claims("u@idp.example", "http://anything", NOW + 1, "idp.example"), NOW)
            .unwrap();
    }

    #[test]
    fn test_issuer_must_match_email_domain() {
        let v = ClaimsValidator::new("*");
        let c = claims("u@hotmail.example", "https://s", NOW + 1, "idp.example");
        assert!(matches!(
            v.validate(&c, NOW),
            Err(Error::IssuerMismatch { email_domain, .. }) if email_domain == "hotmail.example"
        ));
    }

    #[test]
    fn test_secondary_issuer_allowlist() {
        let v = ClaimsValidator::new("*").with_secondary_issuers(["loadtest.local"]);
        v.validate(&claims("u@mozilla.example", "https://s", NOW + 1, "loadtest.local"), NOW)
            .unwrap();
        v.validate(&claims("u@loadtest.local", "https://s", NOW + 1, "LoadTest.Local"), NOW)
            .unwrap();
    }

    #[test]
    fn test_priority_expiry_then_audience_then_issuer() {
        let v = ClaimsValidator::new("https://service.example");
        let all_bad = claims("u@hotmail.example", "http://other.example", NOW - 1, "idp.example");
        assert!(matches!(v.validate(&all_bad, NOW), Err(Error::AssertionExpired)));

        let aud_and_issuer = claims("u@hotmail.example", "http://other.example", NOW + 1, "idp.example");
        assert!(matches!(
            v.validate(&aud_and_issuer, NOW),
            Err(Error::AudienceMismatch { .. })
        ));
    }
}
