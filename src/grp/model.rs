use derive_more::{AsRef, Deref, Display, From, Into, IntoIterator};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Identifier of a ticket, as it appears in the input (e.g. `INC0012345`).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, AsRef, Serialize, Deserialize,
)]
#[as_ref(str, String)]
#[serde(transparent)]
pub struct TicketId(String);

impl From<&str> for TicketId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A ticket record exactly as the input source supplied it.
/// Any text field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTicket {
    pub id: TicketId,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub short_description: Option<String>,
}

impl RawTicket {
    pub fn new<I: Into<TicketId>>(id: I, description: Option<&str>, notes: Option<&str>) -> Self {
        Self {
            id: id.into(),
            description: description.map(str::to_owned),
            notes: notes.map(str::to_owned),
            short_description: None,
        }
    }

    pub fn with_short_description(mut self, short_description: &str) -> Self {
        self.short_description = Some(short_description.to_owned());
        self
    }
}

/// A ticket that survived normalization: `cleaned_text` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub raw: RawTicket,
    pub cleaned_text: String,
}

impl Ticket {
    pub fn id(&self) -> &TicketId {
        &self.raw.id
    }

    /// Short display text: the short-description field when it has content,
    /// otherwise the first `max_chars` characters of the cleaned text.
    pub fn excerpt(&self, max_chars: usize) -> String {
        match self.raw.short_description.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => self.cleaned_text.chars().take(max_chars).collect(),
        }
    }
}

/// The working set of tickets, in input order.
#[derive(Debug, Clone, Default, PartialEq, From, Into, IntoIterator, Deref, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tickets(#[into_iterator(owned, ref)] Vec<Ticket>);

impl Tickets {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn texts(&self) -> Vec<String> {
        self.0.iter().map(|t| t.cleaned_text.clone()).collect()
    }
}

impl FromIterator<Ticket> for Tickets {
    fn from_iter<T: IntoIterator<Item = Ticket>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Newtype for cluster counts which enforces the invariant that they're >= 2.
#[derive(
    Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Into, AsRef, Deref, Serialize, Deserialize, Display,
)]
#[serde(try_from = "usize", into = "usize")]
pub struct ClusterCount(usize);

impl ClusterCount {
    pub const MIN: ClusterCount = ClusterCount(2);

    /// Create a new instance, panicking if `k < ClusterCount::MIN`.
    fn new_unchecked(k: usize) -> Self {
        assert!(
            k >= Self::MIN.0,
            "Invalid cluster count {}; must be >= {}.",
            k,
            Self::MIN
        );
        Self(k)
    }

    pub fn try_new(k: usize) -> Result<Self> {
        if k < Self::MIN.0 {
            Err(PipelineError::invalid(
                "k",
                format!("{} clusters requested; must be >= {}", k, Self::MIN),
            ))
        } else {
            Ok(Self::new_unchecked(k))
        }
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl TryFrom<usize> for ClusterCount {
    type Error = PipelineError;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

/// Label of a cluster within a single assignment; always in `[0, k)`.
#[derive(
    Debug, Copy, Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, From, Into, Deref, Display, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClusterLabel(usize);

/// Contiguous range of candidate cluster counts, `min <= max`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Display)]
#[display("[{}, {}]", min, max)]
pub struct KRange {
    min: ClusterCount,
    max: ClusterCount,
}

impl KRange {
    pub fn try_new(min: usize, max: usize) -> Result<Self> {
        let min = ClusterCount::try_new(min)?;
        let max = ClusterCount::try_new(max)?;
        if min > max {
            return Err(PipelineError::invalid(
                "k_range",
                format!("k_min {} exceeds k_max {}", min, max),
            ));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> ClusterCount {
        self.min
    }

    pub fn max(&self) -> ClusterCount {
        self.max
    }

    /// Clamp the upper bound to `n` points. `None` when even `min` is unreachable.
    pub fn clamp_to(&self, n: usize) -> Option<Self> {
        if n < self.min.0 {
            return None;
        }
        Some(Self {
            min: self.min,
            max: ClusterCount(self.max.0.min(n)),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = ClusterCount> {
        (self.min.0..=self.max.0).map(ClusterCount)
    }

    pub fn len(&self) -> usize {
        self.max.0 - self.min.0 + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Number of samples drawn per cluster for display; at least 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Into, Deref, Display, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SampleSize(usize);

impl SampleSize {
    pub const DEFAULT: SampleSize = SampleSize(3);

    pub fn try_new(size: usize) -> Result<Self> {
        if size == 0 {
            Err(PipelineError::invalid("sample_size", "must be at least 1"))
        } else {
            Ok(Self(size))
        }
    }
}

impl Default for SampleSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<usize> for SampleSize {
    type Error = PipelineError;

    fn try_from(value: usize) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}
