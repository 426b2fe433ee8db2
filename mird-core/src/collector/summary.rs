//! Session summaries mailed when a session ends
//!
//! A summary is plain text: a `Session ID:` header followed by one line per
//! logged event, `<timestamp> - <type>[ <category>:<action>][ (<page>)]`.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde_json::Value;

use crate::error::{Error, Result};

/// Subject line of summary mails
pub const SUMMARY_SUBJECT: &str = "MIRD Session Summary";

/// An outgoing plain-text mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Delivers mails. Called from blocking context.
pub trait Mailer: Send + Sync {
    fn send(&self, mail: &Mail) -> Result<()>;
}

/// Pipes mails into a sendmail-compatible binary (`sendmail -t -i`).
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    program: PathBuf,
}

impl SendmailMailer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Mailer for SendmailMailer {
    fn send(&self, mail: &Mail) -> Result<()> {
        let mut child = Command::new(&self.program)
            .arg("-t")
            .arg("-i")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Mail(format!("failed to run {}: {}", self.program.display(), e)))?;

        // reap the child even when the write fails
        let written = match child.stdin.take() {
            Some(mut stdin) => write!(
                stdin,
                "To: {}\r\nFrom: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
                mail.to, mail.from, mail.subject, mail.body
            ),
            None => Ok(()),
        };

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Mail(format!(
                "sendmail exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        written.map_err(|e| Error::Mail(format!("failed to write mail to sendmail: {}", e)))
    }
}

/// Builds the summary body from a session's log lines.
///
/// Lines that are not JSON objects are skipped.
pub fn compose_summary(session_id: &str, lines: &[String]) -> String {
    let mut summary = format!("Session ID: {session_id}\n");

    for line in lines {
        let Ok(Value::Object(event)) = serde_json::from_str::<Value>(line) else {
            continue;
        };

        let mut entry = format!("{} - {}", field(&event, "timestamp"), field(&event, "type"));
        if let (Some(category), Some(action)) = (event.get("category"), event.get("action")) {
            if !category.is_null() && !action.is_null() {
                entry.push_str(&format!(" {}:{}", text(category), text(action)));
            }
        }
        if let Some(page) = event.get("page").filter(|page| !page.is_null()) {
            entry.push_str(&format!(" ({})", text(page)));
        }

        summary.push_str(&entry);
        summary.push('\n');
    }

    summary
}

/// Builds the summary mail for a finished session.
pub fn summary_mail(to: &str, host: &str, session_id: &str, lines: &[String]) -> Mail {
    Mail {
        to: to.to_string(),
        from: format!("no-reply@{host}"),
        subject: SUMMARY_SUBJECT.to_string(),
        body: compose_summary(session_id, lines),
    }
}

fn field(event: &serde_json::Map<String, Value>, key: &str) -> String {
    event.get(key).map(text).unwrap_or_default()
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<String> {
        vec![
            r#"{"type":"pageview","page":"/","title":"MIRD","referrer":"","timestamp":"2025-05-28T10:00:00.000Z","sessionId":"abc","pageViewCount":1}"#.to_string(),
            r#"{"type":"event","category":"Engagement","action":"CTA Click","label":"Enroll","value":null,"page":"/","timestamp":"2025-05-28T10:01:00.000Z","sessionId":"abc"}"#.to_string(),
            "garbage".to_string(),
            r#"{"type":"session_end","timestamp":"2025-05-28T10:05:00.000Z","sessionId":"abc","pageViewCount":1}"#.to_string(),
        ]
    }

    #[test]
    fn test_compose_summary() {
        let summary = compose_summary("abc", &lines());
        assert_eq!(
            summary,
            "Session ID: abc\n\
             2025-05-28T10:00:00.000Z - pageview (/)\n\
             2025-05-28T10:01:00.000Z - event Engagement:CTA Click (/)\n\
             2025-05-28T10:05:00.000Z - session_end\n"
        );
    }

    #[test]
    fn test_summary_mail_headers() {
        let mail = summary_mail("ops@example.com", "tglauner.com", "abc", &lines());
        assert_eq!(mail.from, "no-reply@tglauner.com");
        assert_eq!(mail.subject, SUMMARY_SUBJECT);
        assert!(mail.body.starts_with("Session ID: abc\n"));
    }

    #[test]
    fn test_sendmail_failure_is_mail_error() {
        let mailer = SendmailMailer::new("/nonexistent/sendmail");
        let mail = summary_mail("ops@example.com", "localhost", "abc", &[]);
        assert!(matches!(mailer.send(&mail), Err(Error::Mail(_))));
    }

    #[test]
    fn test_sendmail_that_stops_reading_is_mail_error() {
        // exits successfully without reading, so the write hits a closed pipe
        let mailer = SendmailMailer::new("true");
        let mut mail = summary_mail("ops@example.com", "localhost", "abc", &[]);
        mail.body = "x".repeat(1024 * 1024);

        match mailer.send(&mail) {
            Err(Error::Mail(message)) => {
                assert!(message.contains("failed to write mail"), "got: {message}")
            }
            other => panic!("expected mail error, got {other:?}"),
        }
    }

    #[test]
    fn test_sendmail_exit_status_is_reported() {
        let mailer = SendmailMailer::new("false");
        let mail = summary_mail("ops@example.com", "localhost", "abc", &lines());

        match mailer.send(&mail) {
            Err(Error::Mail(message)) => {
                assert!(message.contains("sendmail exited with"), "got: {message}")
            }
            other => panic!("expected mail error, got {other:?}"),
        }
    }
}
