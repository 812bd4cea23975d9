//! Ingestion content filter
//!
//! Runs once per item at `add` time. Rejected items are stored as
//! `Filtered` and never displayed.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use tracing::warn;

use super::types::CommentItem;
use crate::features::settings::FilterRules;

/// A custom ingestion predicate
pub trait CommentFilter: Send {
    /// Short name reported when the filter rejects an item
    fn name(&self) -> &str;

    /// Whether the item may be displayed
    fn allows(&self, item: &CommentItem) -> bool;
}

/// Closure-backed `CommentFilter`
pub struct PredicateFilter<F> {
    name: String,
    predicate: F,
}

impl<F> PredicateFilter<F>
where
    F: Fn(&CommentItem) -> bool + Send,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> CommentFilter for PredicateFilter<F>
where
    F: Fn(&CommentItem) -> bool + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn allows(&self, item: &CommentItem) -> bool {
        (self.predicate)(item)
    }
}

/// Why an item was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    Duplicate,
    Keyword(String),
    Pattern(String),
    TooLong(usize),
    BlockedUser(String),
    Predicate(String),
}

/// Outcome of running the filter on one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Allowed,
    Rejected(FilterReason),
}

impl FilterVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, FilterVerdict::Allowed)
    }
}

/// Blocklists, duplicate suppression and custom predicates
pub struct ContentFilter {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
    max_length: Option<usize>,
    blocked_users: HashSet<String>,
    dedup_window: Option<f64>,
    /// Normalized text -> scheduled times of accepted items
    seen: HashMap<String, Vec<f64>>,
    predicates: Vec<Box<dyn CommentFilter>>,
}

impl std::fmt::Debug for ContentFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFilter")
            .field("keywords", &self.keywords)
            .field("patterns", &self.patterns.len())
            .field("max_length", &self.max_length)
            .field("blocked_users", &self.blocked_users.len())
            .field("dedup_window", &self.dedup_window)
            .field("predicates", &self.predicates.len())
            .finish()
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::from_rules(&FilterRules::default())
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl ContentFilter {
    pub fn from_rules(rules: &FilterRules) -> Self {
        let mut filter = Self {
            keywords: Vec::new(),
            patterns: Vec::new(),
            max_length: None,
            blocked_users: HashSet::new(),
            dedup_window: None,
            seen: HashMap::new(),
            predicates: Vec::new(),
        };
        filter.set_rules(rules);
        filter
    }

    /// Replace the rule set, keeping predicates and duplicate history
    ///
    /// Invalid regex patterns are skipped with a warning.
    pub fn set_rules(&mut self, rules: &FilterRules) {
        self.keywords = rules
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self.patterns = rules
            .patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Ignoring invalid filter pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        self.max_length = rules.max_length;
        self.blocked_users = rules.blocked_users.iter().cloned().collect();
        self.dedup_window = rules.dedup_window.filter(|w| w.is_finite() && *w >= 0.0);
    }

    pub fn push_predicate(&mut self, filter: impl CommentFilter + 'static) {
        self.predicates.push(Box::new(filter));
    }

    /// Evaluate an item without recording it
    pub fn check(&self, item: &CommentItem) -> FilterVerdict {
        if let Some(user) = item.user.as_ref() {
            if self.blocked_users.contains(user) {
                return FilterVerdict::Rejected(FilterReason::BlockedUser(user.clone()));
            }
        }

        if let Some(max) = self.max_length {
            let len = item.text.chars().count();
            if len > max {
                return FilterVerdict::Rejected(FilterReason::TooLong(len));
            }
        }

        let normalized = normalize(&item.text);
        if let Some(keyword) = self.keywords.iter().find(|k| normalized.contains(k.as_str())) {
            return FilterVerdict::Rejected(FilterReason::Keyword(keyword.clone()));
        }
        if let Some(re) = self.patterns.iter().find(|re| re.is_match(&item.text)) {
            return FilterVerdict::Rejected(FilterReason::Pattern(re.as_str().to_string()));
        }

        if let Some(window) = self.dedup_window {
            let duplicate = self.seen.get(&normalized).is_some_and(|times| {
                times
                    .iter()
                    .any(|t| (t - item.scheduled_time).abs() <= window)
            });
            if duplicate {
                return FilterVerdict::Rejected(FilterReason::Duplicate);
            }
        }

        for predicate in &self.predicates {
            if !predicate.allows(item) {
                return FilterVerdict::Rejected(FilterReason::Predicate(
                    predicate.name().to_string(),
                ));
            }
        }

        FilterVerdict::Allowed
    }

    /// Remember an accepted item for duplicate suppression
    pub fn record(&mut self, item: &CommentItem) {
        if self.dedup_window.is_some() {
            self.seen
                .entry(normalize(&item.text))
                .or_default()
                .push(item.scheduled_time);
        }
    }

    /// Check and, when allowed, record in one step
    pub fn admit(&mut self, item: &CommentItem) -> FilterVerdict {
        let verdict = self.check(item);
        if verdict.is_allowed() {
            self.record(item);
        }
        verdict
    }

    /// Forget duplicate history (on clear)
    pub fn forget_all(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> FilterRules {
        FilterRules {
            keywords: vec!["Spoiler".to_string()],
            patterns: vec![r"^\d{6,}$".to_string(), "([".to_string()],
            max_length: Some(10),
            blocked_users: vec!["troll".to_string()],
            dedup_window: Some(2.0),
        }
    }

    #[test]
    fn test_keyword_case_insensitive() {
        let filter = ContentFilter::from_rules(&rules());
        let verdict = filter.check(&CommentItem::new("big SPOILER", 1.0));
        assert_eq!(
            verdict,
            FilterVerdict::Rejected(FilterReason::Keyword("spoiler".to_string()))
        );
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let filter = ContentFilter::from_rules(&rules());
        assert_eq!(filter.patterns.len(), 1);
        assert!(!filter.check(&CommentItem::new("1234567", 1.0)).is_allowed());
        assert!(filter.check(&CommentItem::new("12345", 1.0)).is_allowed());
    }

    #[test]
    fn test_length_counts_chars() {
        let filter = ContentFilter::from_rules(&rules());
        assert!(filter.check(&CommentItem::new("弹幕弹幕弹幕弹幕弹幕", 1.0)).is_allowed());
        assert_eq!(
            filter.check(&CommentItem::new("弹幕弹幕弹幕弹幕弹幕弹", 1.0)),
            FilterVerdict::Rejected(FilterReason::TooLong(11))
        );
    }

    #[test]
    fn test_blocked_user() {
        let filter = ContentFilter::from_rules(&rules());
        let item = CommentItem::new("hello", 1.0).with_user("troll");
        assert_eq!(
            filter.check(&item),
            FilterVerdict::Rejected(FilterReason::BlockedUser("troll".to_string()))
        );
    }

    #[test]
    fn test_duplicate_window() {
        let mut filter = ContentFilter::from_rules(&rules());
        assert!(filter.admit(&CommentItem::new("hello", 1.0)).is_allowed());
        assert_eq!(
            filter.admit(&CommentItem::new("  HELLO ", 2.5)),
            FilterVerdict::Rejected(FilterReason::Duplicate)
        );
        assert!(filter.admit(&CommentItem::new("hello", 3.5)).is_allowed());

        filter.forget_all();
        assert!(filter.admit(&CommentItem::new("hello", 1.0)).is_allowed());
    }

    #[test]
    fn test_predicate() {
        let mut filter = ContentFilter::default();
        filter.push_predicate(PredicateFilter::new("no-top", |item: &CommentItem| {
            !item.kind.is_fixed()
        }));
        let top = CommentItem::new("pinned", 1.0).with_kind(super::super::types::CommentKind::Top);
        assert_eq!(
            filter.check(&top),
            FilterVerdict::Rejected(FilterReason::Predicate("no-top".to_string()))
        );
        assert!(filter.check(&CommentItem::new("flows", 1.0)).is_allowed());
    }

    #[test]
    fn test_default_allows_everything() {
        let mut filter = ContentFilter::default();
        for _ in 0..3 {
            assert!(filter.admit(&CommentItem::new("same", 1.0)).is_allowed());
        }
    }
}
