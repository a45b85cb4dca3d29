use std::collections::HashMap;
use std::sync::Arc;

use crate::error::JobError;
use crate::types::Job;

/// A pure function from response body + job to structured data. Concrete
/// parsers (HTML/JSON/XML extractors) are an external, pluggable concern;
/// the registry only needs to be able to look one up by name.
pub type ParserFn = fn(&str, &Job) -> Result<serde_json::Value, JobError>;

/// Immutable map populated once at startup: no mutation at runtime, new
/// parsers are added by changing configuration and restarting. `Arc` makes
/// sharing across job loops free.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: Arc<HashMap<&'static str, ParserFn>>,
}

impl ParserRegistry {
    pub fn new(parsers: HashMap<&'static str, ParserFn>) -> Self {
        Self {
            parsers: Arc::new(parsers),
        }
    }

    /// The built-in registry: only `html-cheerio`, a minimal title/h1
    /// extractor. Real parsers are supplied by the deployment, not this
    /// crate.
    pub fn with_defaults() -> Self {
        let mut parsers: HashMap<&'static str, ParserFn> = HashMap::new();
        parsers.insert("html-cheerio", html_cheerio_parser);
        Self::new(parsers)
    }

    pub fn get(&self, name: &str) -> Result<ParserFn, JobError> {
        self.parsers
            .get(name)
            .copied()
            .ok_or_else(|| JobError::UnknownParser(name.to_string()))
    }
}

/// Hand-rolled title/h1 scan. Stands in for a real `html-cheerio`-equivalent
/// extractor; parsing is explicitly a pluggable, external concern, so this
/// exists only so the default parser name resolves to something rather than
/// nothing.
fn html_cheerio_parser(body: &str, _job: &Job) -> Result<serde_json::Value, JobError> {
    let title = extract_tag_text(body, "title");
    let h1 = extract_tag_text(body, "h1");
    Ok(serde_json::json!({
        "title": title,
        "h1": h1,
    }))
}

fn extract_tag_text(body: &str, tag: &str) -> Option<String> {
    let lower = body.to_ascii_lowercase();
    let open_needle = format!("<{tag}");
    let open_start = lower.find(&open_needle)?;
    let open_end = lower[open_start..].find('>')? + open_start + 1;
    let close_needle = format!("</{tag}>");
    let close_start = lower[open_end..].find(&close_needle)? + open_end;
    Some(body[open_end..close_start].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parser_is_an_error() {
        let registry = ParserRegistry::with_defaults();
        assert!(matches!(
            registry.get("no-such-parser"),
            Err(JobError::UnknownParser(_))
        ));
    }

    #[test]
    fn html_cheerio_extracts_title_and_h1() {
        let registry = ParserRegistry::with_defaults();
        let parser = registry.get("html-cheerio").unwrap();
        let job = Job {
            id: "j1".to_string(),
            url: "http://t.example/ok".to_string(),
            parser: "html-cheerio".to_string(),
            priority: 0,
            metadata: serde_json::json!({}),
            http: Default::default(),
        };
        let data = parser("<html><title>Hi</title><h1>H</h1></html>", &job).unwrap();
        assert_eq!(data["title"], "Hi");
        assert_eq!(data["h1"], "H");
    }
}
