//! TLS certificate expiry

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::checks::CheckStatus;
use crate::remote::shell_quote;

/// Prints `notAfter=<date>` for the certificate served on `domain:443`
pub fn enddate_command(domain: &str) -> String {
    let quoted = shell_quote(domain);
    format!(
        "echo | openssl s_client -servername {d} -connect {d}:443 2>/dev/null | openssl x509 -noout -enddate",
        d = quoted
    )
}

/// Parse `notAfter=Jan  1 00:00:00 2027 GMT`
pub fn parse_enddate(output: &str) -> Option<DateTime<Utc>> {
    let value = output
        .lines()
        .find_map(|l| l.trim().strip_prefix("notAfter="))?;
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Fail once expired, warn inside the warning window
pub fn classify_expiry(expires: DateTime<Utc>, now: DateTime<Utc>, warn_days: i64) -> (CheckStatus, i64) {
    let days_left = (expires - now).num_days();
    let status = if expires <= now {
        CheckStatus::Fail
    } else if days_left < warn_days {
        CheckStatus::Warn
    } else {
        CheckStatus::Pass
    };
    (status, days_left)
}
