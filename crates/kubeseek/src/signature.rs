//! Log signature matching.
//!
//! A signature rule flags log lines that match a case-insensitive inclusion
//! pattern and contain none of the rule's exclusion substrings. Matching is a
//! pure function of the input text: source order and duplicates are kept.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use crate::types::LogSource;

/// Kernel messages worth surfacing.
pub const DMESG_PATTERN: &str = r"oom|failed|critical";

/// Partition-table chatter that trips the dmesg pattern.
pub const DMESG_EXCLUSIONS: &[&str] = &["GPT"];

/// Application log lines worth surfacing (111 is ECONNREFUSED).
pub const APPLICATION_LOG_PATTERN: &str = r"oom|111|timeout";

/// Deprecation warnings that trip the application log pattern.
pub const APPLICATION_LOG_EXCLUSIONS: &[&str] = &["CPendingDeprecationWarning"];

/// Pods whose names contain this marker skip the application log check.
const APPLICATION_LOG_SKIP_MARKER: &str = "redis";

static DMESG_RULE: LazyLock<SignatureRule> = LazyLock::new(|| {
    SignatureRule::new(LogSource::Dmesg, DMESG_PATTERN, DMESG_EXCLUSIONS).unwrap()
});

static APPLICATION_LOG_RULE: LazyLock<SignatureRule> = LazyLock::new(|| {
    SignatureRule::new(
        LogSource::ApplicationLog,
        APPLICATION_LOG_PATTERN,
        APPLICATION_LOG_EXCLUSIONS,
    )
    .unwrap()
});

/// An inclusion pattern plus exclusion substrings.
#[derive(Debug, Clone)]
pub struct SignatureRule {
    source: LogSource,
    inclusion: Regex,
    exclusions: Vec<String>,
}

impl SignatureRule {
    /// Build a rule. The inclusion pattern is compiled case-insensitively;
    /// exclusions are matched verbatim.
    pub fn new<S: AsRef<str>>(
        source: LogSource,
        inclusion: &str,
        exclusions: &[S],
    ) -> Result<Self, regex::Error> {
        let inclusion = RegexBuilder::new(inclusion)
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            source,
            inclusion,
            exclusions: exclusions.iter().map(|s| s.as_ref().to_string()).collect(),
        })
    }

    #[must_use]
    pub fn source(&self) -> LogSource {
        self.source
    }

    /// Whether a single line is flagged by this rule.
    #[must_use]
    pub fn is_match(&self, line: &str) -> bool {
        self.inclusion.is_match(line)
            && !self.exclusions.iter().any(|ex| line.contains(ex.as_str()))
    }

    /// All flagged lines in `text`, in source order.
    #[must_use]
    pub fn matches<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.lines().filter(|line| self.is_match(line)).collect()
    }
}

/// The fixed rule for a log source.
#[must_use]
pub fn canonical_rule(source: LogSource) -> &'static SignatureRule {
    match source {
        LogSource::Dmesg => &DMESG_RULE,
        LogSource::ApplicationLog => &APPLICATION_LOG_RULE,
    }
}

/// Run the canonical rule for `source` over `text`.
#[must_use]
pub fn match_lines(source: LogSource, text: &str) -> Vec<String> {
    canonical_rule(source)
        .matches(text)
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Redis pods log numeric noise that matches the application pattern.
#[must_use]
pub fn skips_application_log(pod_name: &str) -> bool {
    pod_name
        .to_ascii_lowercase()
        .contains(APPLICATION_LOG_SKIP_MARKER)
}
