use std::borrow::Cow;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::{RawTicket, Ticket, Tickets};
use crate::error::{PipelineError, Result};

/// Line prefixes that mark e-mail headers and legal/caution banners.
pub const DEFAULT_BOILERPLATE_MARKERS: &[&str] = &[
    "From",
    "Sent",
    "To",
    "Cc",
    "Subject",
    "CAUTION",
    "Disclaimer",
    "Confidentiality Notice",
];

/// Which cleanup rules run. Rule order is fixed: markup, boilerplate,
/// URLs, then whitespace collapsing (which always runs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerRules {
    pub strip_markup: bool,
    pub strip_boilerplate: bool,
    pub strip_urls: bool,
    /// Markers are matched case-insensitively at the start of a line,
    /// followed by a colon.
    pub boilerplate_markers: Vec<String>,
}

impl Default for NormalizerRules {
    fn default() -> Self {
        Self {
            strip_markup: true,
            strip_boilerplate: true,
            strip_urls: true,
            boilerplate_markers: DEFAULT_BOILERPLATE_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Trait for records from which we want to extract clusterable text.
pub trait Normalizable {
    /// The raw text handed to the normalizer, before any rule runs.
    /// `None` stands for a missing value.
    fn pre_normalize(&self) -> Option<Cow<'_, str>>;
}

impl Normalizable for str {
    fn pre_normalize(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self))
    }
}

impl Normalizable for RawTicket {
    /// Description and notes joined with a single space; a missing field
    /// counts as empty.
    fn pre_normalize(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Owned(format!(
            "{} {}",
            self.description.as_deref().unwrap_or_default(),
            self.notes.as_deref().unwrap_or_default()
        )))
    }
}

impl<T: Normalizable + ?Sized> Normalizable for Option<&T> {
    fn pre_normalize(&self) -> Option<Cow<'_, str>> {
        self.and_then(|t| t.pre_normalize())
    }
}

/// Compiled cleanup rules.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    /// Tags that end a line in rendered HTML.
    line_breaks: Option<Regex>,
    markup: Option<Regex>,
    boilerplate: Option<Regex>,
    urls: Option<Regex>,
    whitespace: Regex,
}

impl TextNormalizer {
    pub fn new(rules: &NormalizerRules) -> Result<Self> {
        let line_breaks = rules
            .strip_markup
            .then(|| compile(r"(?i)<[ \t]*/?[ \t]*(?:br|p|div|li|tr)\b[^<>\n]*>"))
            .transpose()?;
        // A tag never spans lines.
        let markup = rules
            .strip_markup
            .then(|| compile(r"<[^<>\n]*>"))
            .transpose()?;

        let markers = rules
            .boilerplate_markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>();
        let boilerplate = (rules.strip_boilerplate && !markers.is_empty())
            .then(|| compile(&format!(r"(?im)^[ \t]*(?:{})[ \t]*:.*$", markers.join("|"))))
            .transpose()?;

        let urls = rules
            .strip_urls
            .then(|| compile(r"(?i)(?:https?://|www\.)\S+"))
            .transpose()?;

        Ok(Self {
            line_breaks,
            markup,
            boilerplate,
            urls,
            whitespace: compile(r"\s+")?,
        })
    }

    /// Clean a single value. Missing input yields the empty string.
    pub fn normalize<N: Normalizable + ?Sized>(&self, item: &N) -> String {
        match item.pre_normalize() {
            Some(text) => self.clean(&text),
            None => String::new(),
        }
    }

    fn clean(&self, text: &str) -> String {
        let mut text = Cow::Borrowed(text);
        if let Some(re) = &self.line_breaks {
            text = Cow::Owned(re.replace_all(&text, "\n").into_owned());
        }
        if let Some(re) = &self.markup {
            text = Cow::Owned(re.replace_all(&text, " ").into_owned());
        }
        if let Some(re) = &self.boilerplate {
            text = Cow::Owned(re.replace_all(&text, "").into_owned());
        }
        if let Some(re) = &self.urls {
            text = Cow::Owned(re.replace_all(&text, " ").into_owned());
        }
        self.whitespace.replace_all(&text, " ").trim().to_owned()
    }

    /// Clean a batch of raw records, dropping the ones that end up empty.
    /// Filtering happens after the two text fields are joined and cleaned.
    pub fn prepare_tickets(&self, raw: Vec<RawTicket>) -> Tickets {
        let total = raw.len();
        let tickets: Tickets = raw
            .into_iter()
            .filter_map(|r| {
                let cleaned_text = self.normalize(&r);
                if cleaned_text.is_empty() {
                    debug!(ticket = %r.id, "dropping ticket with no usable text");
                    None
                } else {
                    Some(Ticket { raw: r, cleaned_text })
                }
            })
            .collect();
        info!(
            total,
            usable = tickets.len(),
            dropped = total - tickets.len(),
            "normalized ticket text"
        );
        tickets
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PipelineError::invalid("normalizer_rules", e.to_string()))
}
