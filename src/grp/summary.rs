use anyhow::Context as _;
use rand::SeedableRng;
use rand::seq::index;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use super::kmeans::ClusterAssignment;
use super::model::{ClusterCount, ClusterLabel, SampleSize, TicketId, Tickets};
use crate::error::{PipelineError, Result};

const REPORT_TEMPLATE: &str = r#"--- Cluster Analysis Summary ---
{{ total }} tickets in {{ k }} clusters (inertia {{ inertia | round(precision=4) }})
Number of tickets per cluster:
{% for c in clusters %}  cluster {{ c.label }}: {{ c.count }}
{% endfor %}
--- Sample Tickets from Each Cluster ---
{% for c in clusters %}
--- Cluster {{ c.label }} Samples ---
{% for s in c.samples %}  Ticket Number: {{ s.id }}
  Text: {{ s.excerpt }}{% if s.truncated %}...{% endif %}
{% endfor %}{% if c.samples | length == 0 %}  (empty)
{% endif %}{% endfor %}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    pub sample_size: SampleSize,
    /// Characters of cleaned text shown per sample.
    pub excerpt_chars: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            sample_size: SampleSize::DEFAULT,
            excerpt_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSample {
    pub id: TicketId,
    pub excerpt: String,
    /// The excerpt is shorter than the text it was cut from.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub label: ClusterLabel,
    pub count: usize,
    pub samples: Vec<TicketSample>,
}

/// Per-cluster counts and samples for one assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub k: ClusterCount,
    pub total: usize,
    pub inertia: f64,
    pub clusters: Vec<ClusterSummary>,
}

impl ClusterReport {
    /// Render the console report.
    pub fn render(&self) -> anyhow::Result<String> {
        let context = Context::from_serialize(self).with_context(|| "ClusterReport::render()")?;
        Tera::one_off(REPORT_TEMPLATE, &context, false).with_context(|| "ClusterReport::render()")
    }
}

#[derive(Debug, Clone)]
pub struct ResultSummarizer {
    settings: SummarySettings,
    seed: u64,
}

impl ResultSummarizer {
    pub fn new(settings: SummarySettings, seed: u64) -> Self {
        Self { settings, seed }
    }

    /// Count every label in `[0, k)` and draw up to `sample_size` distinct
    /// tickets from each, with one RNG seeded from `seed`, labels in order.
    pub fn summarize(&self, tickets: &Tickets, assignment: &ClusterAssignment) -> Result<ClusterReport> {
        if tickets.len() != assignment.len() {
            return Err(PipelineError::invalid(
                "assignment",
                format!(
                    "{} labels for {} tickets",
                    assignment.len(),
                    tickets.len()
                ),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let clusters = assignment
            .members()
            .into_iter()
            .enumerate()
            .map(|(label, members)| {
                let amount = members.len().min(*self.settings.sample_size);
                let samples = index::sample(&mut rng, members.len(), amount)
                    .into_iter()
                    .map(|i| {
                        let ticket = &tickets[members[i]];
                        let excerpt = ticket.excerpt(self.settings.excerpt_chars);
                        TicketSample {
                            id: ticket.id().clone(),
                            truncated: excerpt.chars().count() < ticket.cleaned_text.chars().count()
                                && ticket
                                    .raw
                                    .short_description
                                    .as_deref()
                                    .is_none_or(|s| s.trim().is_empty()),
                            excerpt,
                        }
                    })
                    .collect();
                ClusterSummary {
                    label: label.into(),
                    count: members.len(),
                    samples,
                }
            })
            .collect();

        Ok(ClusterReport {
            k: assignment.k,
            total: tickets.len(),
            inertia: assignment.inertia,
            clusters,
        })
    }
}
