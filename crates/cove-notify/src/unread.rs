use crate::NotifyError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Label id of the inbox in provider counters.
const INBOX_LABEL_ID: &str = "0";

/// A provider API response captured from the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedResponse {
    pub url: String,
    pub body: String,
}

impl InterceptedResponse {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterField {
    Counts,
    MessageCounts,
}

impl CounterField {
    fn key(self) -> &'static str {
        match self {
            CounterField::Counts => "Counts",
            CounterField::MessageCounts => "MessageCounts",
        }
    }
}

/// URL patterns of the provider endpoints the bridge listens to.
#[derive(Debug, Clone)]
pub struct ResponseMatchers {
    counts: Regex,
    events: Regex,
}

impl ResponseMatchers {
    pub fn new(entry_api_url: &str) -> Result<Self, NotifyError> {
        let base = regex::escape(entry_api_url.trim_end_matches('/'));
        Ok(Self {
            counts: Regex::new(&format!("{base}/api/messages/count"))?,
            events: Regex::new(&format!("{base}/api/events/.*=="))?,
        })
    }

    pub fn is_events(&self, url: &str) -> bool {
        self.events.is_match(url)
    }

    /// Inbox unread count carried by `response`, if it is a counter response
    /// with a counter array. Bodies that are not JSON are errors.
    pub fn unread(&self, response: &InterceptedResponse) -> Result<Option<u64>, NotifyError> {
        let field = if self.counts.is_match(&response.url) {
            CounterField::Counts
        } else if self.events.is_match(&response.url) {
            CounterField::MessageCounts
        } else {
            return Ok(None);
        };

        let body: Value = serde_json::from_str(&response.body)?;
        Ok(inbox_unread(&body, field))
    }
}

fn inbox_unread(body: &Value, field: CounterField) -> Option<u64> {
    let counters = body.get(field.key())?.as_array()?;
    let total = counters
        .iter()
        .filter(|counter| counter.get("LabelID").and_then(Value::as_str) == Some(INBOX_LABEL_ID))
        .filter_map(|counter| counter.get("Unread").and_then(Value::as_u64))
        .sum();
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    const API: &str = "https://mail.example.com/api-host";

    fn matchers() -> ResponseMatchers {
        ResponseMatchers::new(API).expect("patterns")
    }

    #[test]
    fn sums_inbox_counts() {
        let response = InterceptedResponse::new(
            format!("{API}/api/messages/count"),
            r#"{"Counts":[{"LabelID":"0","Unread":3},{"LabelID":"5","Unread":9},{"LabelID":"0","Unread":2}]}"#,
        );
        assert_eq!(matchers().unread(&response).expect("parse"), Some(5));
    }

    #[test]
    fn reads_message_counts_from_events() {
        let response = InterceptedResponse::new(
            format!("{API}/api/events/abc=="),
            r#"{"MessageCounts":[{"LabelID":"0","Unread":4}]}"#,
        );
        let matchers = matchers();
        assert!(matchers.is_events(&response.url));
        assert_eq!(matchers.unread(&response).expect("parse"), Some(4));
    }

    #[test]
    fn missing_counters_and_foreign_urls_yield_nothing() {
        let matchers = matchers();
        let events = InterceptedResponse::new(format!("{API}/api/events/abc=="), r#"{"Code":1000}"#);
        assert_eq!(matchers.unread(&events).expect("parse"), None);

        let other = InterceptedResponse::new(format!("{API}/api/contacts"), "not json");
        assert_eq!(matchers.unread(&other).expect("ignored"), None);
        assert!(!matchers.is_events("https://elsewhere.test/api/events/abc=="));
    }

    #[test]
    fn unparseable_counter_body_is_an_error() {
        let response = InterceptedResponse::new(format!("{API}/api/messages/count"), "<html>");
        assert!(matchers().unread(&response).is_err());
    }
}
