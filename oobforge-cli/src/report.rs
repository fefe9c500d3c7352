//! Status output for the stored credential record.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use oobforge_core::{CredentialRecord, PipelineState, Secret, TokenClaims};
use serde::Serialize;

/// Characters of each token shown in status output.
const PREVIEW_LEN: usize = 12;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub path: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<ClaimsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims_error: Option<String>,
}

/// The record with every token cut down to a prefix.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub email: Option<String>,
    pub code_requested_at: Option<DateTime<Utc>>,
    pub local_id: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<u64>,
    pub signed_in_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub application_token: Option<String>,
    pub application_token_type: Option<String>,
    pub application_token_expiry: Option<u64>,
    pub application_token_issued_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ClaimsSummary {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub subject: Option<String>,
    pub email: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_secs: Option<i64>,
    pub expired: bool,
}

fn preview(secret: &Option<Secret>) -> Option<String> {
    secret.as_ref().map(|s| s.preview(PREVIEW_LEN))
}

impl StatusReport {
    pub fn new(path: &Path, record: Option<&CredentialRecord>, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return Self {
                path: path.display().to_string(),
                state: "none".to_string(),
                record: None,
                claims: None,
                claims_error: None,
            };
        };

        let (claims, claims_error) = match &record.application_token {
            Some(token) => match TokenClaims::decode(token.expose()) {
                Ok(decoded) => (Some(ClaimsSummary::new(&decoded, now)), None),
                Err(e) => (None, Some(e.to_string())),
            },
            None => (None, None),
        };

        Self {
            path: path.display().to_string(),
            state: PipelineState::from_record(record).to_string(),
            record: Some(RecordSummary {
                email: record.email.clone(),
                code_requested_at: record.code_requested_at,
                local_id: record.local_id.clone(),
                id_token: preview(&record.id_token),
                refresh_token: preview(&record.refresh_token),
                token_expiry: record.token_expiry,
                signed_in_at: record.signed_in_at,
                activated_at: record.activated_at,
                application_token: preview(&record.application_token),
                application_token_type: record.application_token_type.clone(),
                application_token_expiry: record.application_token_expiry,
                application_token_issued_at: record.application_token_issued_at,
            }),
            claims,
            claims_error,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Record: {}", self.path);
        let _ = writeln!(out, "State:  {}", self.state);

        let Some(record) = &self.record else {
            let _ = writeln!(out, "No registration in progress.");
            return out;
        };

        let rows: [(&str, Option<String>); 12] = [
            ("Email", record.email.clone()),
            ("Code requested", record.code_requested_at.map(|t| t.to_rfc3339())),
            ("User ID", record.local_id.clone()),
            ("ID token", record.id_token.clone()),
            ("Refresh token", record.refresh_token.clone()),
            ("Token lifetime", record.token_expiry.map(|s| format!("{}s", s))),
            ("Signed in", record.signed_in_at.map(|t| t.to_rfc3339())),
            ("Activated", record.activated_at.map(|t| t.to_rfc3339())),
            ("App token", record.application_token.clone()),
            ("App token type", record.application_token_type.clone()),
            (
                "App token lifetime",
                record.application_token_expiry.map(|s| format!("{}s", s)),
            ),
            (
                "App token issued",
                record.application_token_issued_at.map(|t| t.to_rfc3339()),
            ),
        ];
        for (label, value) in rows {
            if let Some(value) = value {
                let _ = writeln!(out, "  {:<20}{}", format!("{}:", label), value);
            }
        }

        if let Some(claims) = &self.claims {
            let _ = writeln!(out, "App token claims:");
            let rows = [
                ("iss", claims.issuer.clone()),
                ("aud", claims.audience.clone()),
                ("user", claims.subject.clone()),
                ("email", claims.email.clone()),
                ("iat", claims.issued_at.map(|t| t.to_rfc3339())),
                ("exp", claims.expires_at.map(|t| t.to_rfc3339())),
            ];
            for (label, value) in rows {
                if let Some(value) = value {
                    let _ = writeln!(out, "  {:<20}{}", format!("{}:", label), value);
                }
            }
            if let Some(secs) = claims.remaining_secs {
                let left = if claims.expired {
                    "expired".to_string()
                } else {
                    format!("{}m {}s", secs / 60, secs % 60)
                };
                let _ = writeln!(out, "  {:<20}{}", "remaining:", left);
            }
        } else if let Some(error) = &self.claims_error {
            let _ = writeln!(out, "App token claims unavailable: {}", error);
        }

        out
    }
}

impl ClaimsSummary {
    fn new(claims: &TokenClaims, now: DateTime<Utc>) -> Self {
        Self {
            issuer: claims.iss.clone(),
            audience: claims.aud.as_ref().map(|a| a.to_string()),
            subject: claims.subject().map(str::to_string),
            email: claims.email.clone(),
            issued_at: claims.issued_at(),
            expires_at: claims.expires_at(),
            remaining_secs: claims.remaining(now).map(|d| d.num_seconds()),
            expired: claims.is_expired(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oobforge_core::AppToken;
    use std::path::PathBuf;

    // {"iss":"https://securetoken.example.com/p","aud":"p","user_id":"u1","email":"a@b.com","iat":1700000000,"exp":1700003600}
    const JWT: &str = "eyJhbGciOiJSUzI1NiJ9.eyJpc3MiOiJodHRwczovL3NlY3VyZXRva2VuLmV4YW1wbGUuY29tL3AiLCJhdWQiOiJwIiwidXNlcl9pZCI6InUxIiwiZW1haWwiOiJhQGIuY29tIiwiaWF0IjoxNzAwMDAwMDAwLCJleHAiOjE3MDAwMDM2MDB9.sig";

    fn completed_record() -> CredentialRecord {
        let mut record = CredentialRecord::new("a@b.com");
        record
            .mark_signed_in(
                Some("u1".to_string()),
                Secret::new("identity-token-abcdefghijklmnop"),
                Secret::new("refresh-token-abcdefghijklmnop"),
                Some(3600),
            )
            .unwrap();
        record.mark_activated().unwrap();
        record
            .set_application_token(AppToken {
                access_token: Secret::new(JWT),
                refresh_token: None,
                expires_in: Some(3600),
                token_type: Some("Bearer".to_string()),
            })
            .unwrap();
        record
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_report_without_record() {
        let report = StatusReport::new(&PathBuf::from("/tmp/c.json"), None, at(0));
        assert_eq!(report.state, "none");
        assert!(report.to_text().contains("No registration in progress."));
    }

    #[test]
    fn test_report_redacts_tokens() {
        let record = completed_record();
        let report = StatusReport::new(&PathBuf::from("/tmp/c.json"), Some(&record), at(1_700_000_000));

        let text = report.to_text();
        let json = report.to_json().unwrap();
        for output in [&text, &json] {
            assert!(!output.contains("identity-token-abcdefghijklmnop"));
            assert!(!output.contains("refresh-token-abcdefghijklmnop"));
            assert!(!output.contains(JWT));
        }
        assert!(text.contains("identity-tok..."));
        assert!(text.contains("State:  Completed"));
    }

    #[test]
    fn test_report_decodes_claims() {
        let record = completed_record();
        let report = StatusReport::new(&PathBuf::from("/tmp/c.json"), Some(&record), at(1_700_000_000));

        let claims = report.claims.as_ref().unwrap();
        assert_eq!(claims.subject.as_deref(), Some("u1"));
        assert_eq!(claims.audience.as_deref(), Some("p"));
        assert_eq!(claims.remaining_secs, Some(3600));
        assert!(!claims.expired);
        assert!(report.to_text().contains("60m 0s"));

        let later = StatusReport::new(&PathBuf::from("/tmp/c.json"), Some(&record), at(1_700_007_200));
        assert!(later.claims.unwrap().expired);
    }

    #[test]
    fn test_report_opaque_app_token() {
        let mut record = completed_record();
        record.application_token = Some(Secret::new("opaque"));

        let report = StatusReport::new(&PathBuf::from("/tmp/c.json"), Some(&record), at(0));
        assert!(report.claims.is_none());
        assert!(report.claims_error.is_some());
        assert!(report.to_text().contains("claims unavailable"));
    }
}
