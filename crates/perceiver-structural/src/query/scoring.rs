//! Tiered text scoring for element search.
//!
//! A query is compared with every text field of a candidate. Each comparison
//! yields a match level (exact, phrase, stemmed words, fuzzy similarity) that
//! is weighted by the tier of the field it matched in.

use nucleo_matcher::pattern::{CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32String};

use crate::model::{ScoreBreakdown, ScoreComponent};
use crate::text::{normalize, stem, words};

const EXACT: f32 = 1.0;
const PHRASE: f32 = 0.8;
const STEMMED: f32 = 0.6;
const FUZZY: f32 = 0.5;

/// Similarity granted when the query is an ordered subsequence of the field.
const SUBSEQUENCE_RATIO: f64 = 0.7;
const MIN_SUBSEQUENCE_QUERY: usize = 3;
const MIN_FUZZY_WORD: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tier {
    /// Text the user sees.
    Text,
    /// Accessible name, aria-label, title, placeholder, alt.
    Accessible,
    /// Remaining curated attributes.
    Attribute,
}

impl Tier {
    fn weight(&self) -> f32 {
        match self {
            Tier::Text => 1.0,
            Tier::Accessible => 0.8,
            Tier::Attribute => 0.6,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Tier::Text => "text",
            Tier::Accessible => "accessible",
            Tier::Attribute => "attribute",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub tier: Tier,
    pub value: String,
}

/// Ratcliff/Obershelp similarity over characters, in `0.0..=1.0`.
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    // Longest common substring, first occurrence on ties.
    let mut best = (0, 0, 0);
    let mut row = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut diagonal = 0;
        for j in 1..=b.len() {
            let above = row[j];
            row[j] = if a[i - 1] == b[j - 1] { diagonal + 1 } else { 0 };
            if row[j] > best.2 {
                best = (i - row[j], j - row[j], row[j]);
            }
            diagonal = above;
        }
    }
    let (start_a, start_b, len) = best;
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..start_a], &b[..start_b])
        + matching_chars(&a[start_a + len..], &b[start_b + len..])
}

pub(crate) struct Scorer {
    query: String,
    stems: Vec<String>,
    pattern: Option<Pattern>,
    matcher: Matcher,
    fuzzy_threshold: f64,
}

impl Scorer {
    pub(crate) fn new(query: &str, fuzzy_threshold: f64) -> Self {
        let query = normalize(query);
        let stems = words(&query).iter().map(|word| stem(word)).collect();
        let pattern = (query.chars().count() >= MIN_SUBSEQUENCE_QUERY)
            .then(|| Pattern::parse(&query, CaseMatching::Smart, Normalization::Smart));
        Self {
            query,
            stems,
            pattern,
            matcher: Matcher::new(Config::DEFAULT),
            fuzzy_threshold,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    fn fuzzy_ratio(&mut self, field: &str) -> f64 {
        let mut ratio = similarity(&self.query, field);
        for word in words(field) {
            if word.chars().count() >= MIN_FUZZY_WORD {
                ratio = ratio.max(similarity(&self.query, &word));
            }
        }
        if let Some(pattern) = self.pattern.as_ref() {
            let haystack = Utf32String::from(field);
            if pattern.score(haystack.slice(..), &mut self.matcher).is_some() {
                ratio = ratio.max(SUBSEQUENCE_RATIO);
            }
        }
        ratio
    }

    /// Best match level of the query in one field, with its label.
    fn level(&mut self, field: &str) -> Option<(&'static str, f32)> {
        let field = normalize(field);
        if field.is_empty() {
            return None;
        }
        if field == self.query {
            return Some(("exact", EXACT));
        }
        if field.contains(&self.query) {
            return Some(("phrase", PHRASE));
        }
        if !self.stems.is_empty() {
            let field_stems: Vec<String> = words(&field).iter().map(|word| stem(word)).collect();
            let hits = self
                .stems
                .iter()
                .filter(|query_stem| field_stems.contains(query_stem))
                .count();
            if hits > 0 {
                return Some(("stemmed", STEMMED * hits as f32 / self.stems.len() as f32));
            }
        }
        let ratio = self.fuzzy_ratio(&field);
        (ratio >= self.fuzzy_threshold).then(|| ("fuzzy", FUZZY * ratio as f32))
    }

    /// Scores `fields`; `None` when nothing matched. `prefix` names the criterion in labels.
    pub(crate) fn score(&mut self, prefix: &str, fields: &[Field]) -> Option<ScoreBreakdown> {
        let mut components: Vec<ScoreComponent> = Vec::new();
        for field in fields {
            let Some((level, value)) = self.level(&field.value) else {
                continue;
            };
            let label = format!("{prefix}.{}.{level}", field.tier.label());
            let contribution = value * field.tier.weight();
            match components.iter_mut().find(|existing| existing.label == label) {
                Some(existing) if existing.contribution >= contribution => {}
                Some(existing) => existing.contribution = contribution,
                None => components.push(ScoreComponent {
                    label,
                    weight: field.tier.weight(),
                    contribution,
                }),
            }
        }
        let total = components
            .iter()
            .map(|component| component.contribution)
            .fold(0.0f32, f32::max);
        (total > 0.0).then_some(ScoreBreakdown { total, components })
    }
}
