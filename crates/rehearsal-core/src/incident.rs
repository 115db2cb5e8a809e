//! Incident reporting at the presentation boundary.

use std::fmt;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

/// Short reference id a user can quote to an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Incident {
    pub id: IncidentId,
    /// Text to show the user.
    pub message: String,
}

/// Log `err` under a fresh incident id and build the user-facing apology.
pub fn report_incident(err: &(dyn std::error::Error + 'static), apology: &str) -> Incident {
    let id = IncidentId::new();
    error!(incident = %id, "Unhandled exception: {}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        error!(incident = %id, "  caused by: {}", cause);
        source = cause.source();
    }
    Incident {
        message: format!("{}\n\nReference id: {}", apology, id),
        id,
    }
}

/// Human-readable duration, e.g. "1 hours 2 minutes 5 seconds".
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let parts: Vec<String> = [(days, "days"), (hours, "hours"), (minutes, "minutes"), (seconds, "seconds")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{} {}", n, unit))
        .collect();
    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_short_and_distinct() {
        let a = IncidentId::new();
        let b = IncidentId::new();
        assert_eq!(a.as_str().len(), 8);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn incident_message_carries_reference() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let incident = report_incident(&err, "Oops!");
        assert!(incident.message.starts_with("Oops!"));
        assert!(incident.message.ends_with(&format!("Reference id: {}", incident.id)));
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "59 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1 hours 2 minutes 5 seconds");
        assert_eq!(format_elapsed(Duration::from_secs(86_400 + 60)), "1 days 1 minutes");
    }
}
