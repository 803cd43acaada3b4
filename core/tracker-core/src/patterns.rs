//! Compiled regex patterns for parsing provider annotations.
//!
//! Compiled once on first use. Update these when the provider changes how it
//! formats the free-text status block.

use once_cell::sync::Lazy;
use regex::Regex;

/// `Station:`, `Event:` or `Speed:` label, case-insensitive. The value of a
/// label runs until the next label or the end of the annotation.
pub static RE_ANNOTATION_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(station|event|speed)\s*:").unwrap());

/// Markup the provider sometimes embeds between segments (`<br>`, `<b>`).
pub static RE_MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

pub static RE_WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
