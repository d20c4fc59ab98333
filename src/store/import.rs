use regex::Regex;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};
use crate::models::account::AccountCredential;

/// Field names understood by the bulk-import format string. `ANY` matches a
/// field that is present in the input but not kept.
const FIELDS: &[&str] = &[
    "twoFactorSecret",
    "emailPassword",
    "authToken",
    "username",
    "password",
    "email",
    "ANY",
];

#[derive(Debug, Clone, PartialEq)]
enum FormatPart {
    Field(&'static str),
    Wildcard,
    Literal(String),
}

fn tokenize_format(format: &str) -> Vec<FormatPart> {
    let mut parts = Vec::new();
    let mut rest = format;
    let mut literal = String::new();
    'outer: while !rest.is_empty() {
        for field in FIELDS.iter().copied() {
            if let Some(tail) = rest.strip_prefix(field) {
                if !literal.is_empty() {
                    parts.push(FormatPart::Literal(std::mem::take(&mut literal)));
                }
                if field == "ANY" {
                    parts.push(FormatPart::Wildcard);
                } else {
                    parts.push(FormatPart::Field(field));
                }
                rest = tail;
                continue 'outer;
            }
        }
        let ch = rest.chars().next().expect("non-empty rest");
        literal.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    if !literal.is_empty() {
        parts.push(FormatPart::Literal(literal));
    }
    parts
}

/// Compiles a format string like
/// `username:password:email:emailPassword:authToken:twoFactorSecret` into a
/// line regex. Field names become named capture groups; everything else is
/// matched literally.
pub fn format_to_regex(format: &str) -> GatewayResult<Regex> {
    let parts = tokenize_format(format);
    if !parts.iter().any(|p| *p == FormatPart::Field("username")) {
        return Err(GatewayError::InvalidInput(
            "import format must contain a username field".to_string(),
        ));
    }
    let mut pattern = String::from("^");
    for part in &parts {
        match part {
            FormatPart::Field(name) => pattern.push_str(&format!("(?P<{name}>.*?)")),
            FormatPart::Wildcard => pattern.push_str(".*?"),
            FormatPart::Literal(text) => pattern.push_str(&regex::escape(text)),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| GatewayError::InvalidInput(format!("invalid import format: {e}")))
}

/// Parses newline-separated account records. Lines that do not match the
/// format are skipped with a warning rather than failing the whole import.
pub fn parse_accounts(format: &str, input: &str) -> GatewayResult<Vec<AccountCredential>> {
    let line_regex = format_to_regex(format)?;
    let mut records = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = line_regex.captures(line) else {
            warn!("Import line {} does not match format, skipping", idx + 1);
            continue;
        };
        let grab = |name: &str| {
            caps.name(name)
                .map(|m| m.as_str().to_string())
                .filter(|s| !s.is_empty())
        };
        let Some(username) = grab("username") else {
            warn!("Import line {} has an empty username, skipping", idx + 1);
            continue;
        };
        records.push(AccountCredential {
            username,
            password: grab("password").unwrap_or_default(),
            email: grab("email").unwrap_or_default(),
            email_password: grab("emailPassword").unwrap_or_default(),
            auth_token: grab("authToken"),
            two_factor_secret: grab("twoFactorSecret"),
        });
    }
    Ok(records)
}

/// Inverse of [`parse_accounts`] for the fields the format names; wildcard
/// positions render empty. Used by the operator export path.
pub fn render_accounts(format: &str, records: &[AccountCredential]) -> String {
    let parts = tokenize_format(format);
    records
        .iter()
        .map(|record| {
            let mut line = String::new();
            for part in &parts {
                match part {
                    FormatPart::Field(name) => line.push_str(match *name {
                        "username" => record.username.as_str(),
                        "password" => record.password.as_str(),
                        "email" => record.email.as_str(),
                        "emailPassword" => record.email_password.as_str(),
                        "authToken" => record.auth_token.as_deref().unwrap_or(""),
                        "twoFactorSecret" => record.two_factor_secret.as_deref().unwrap_or(""),
                        _ => "",
                    }),
                    FormatPart::Wildcard => {}
                    FormatPart::Literal(text) => line.push_str(text),
                }
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
