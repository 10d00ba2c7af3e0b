//! One-line explanations of search scores.

use std::cmp::Ordering;

use crate::model::{ScoreBreakdown, ScoreComponent};

pub fn summarize(score: &ScoreBreakdown) -> String {
    let mut components = score.components.clone();
    components.sort_by(|a, b| {
        b.contribution
            .partial_cmp(&a.contribution)
            .unwrap_or(Ordering::Equal)
    });

    let top_reasons: Vec<String> = components.iter().take(3).map(describe_component).collect();

    if top_reasons.is_empty() {
        format!("score={:.2}", score.total)
    } else {
        format!("score={:.2}; {}", score.total, top_reasons.join(", "))
    }
}

/// Labels are `criterion.tier.level`, e.g. `text.accessible.stemmed`.
fn describe_component(component: &ScoreComponent) -> String {
    let gain = format_gain(component.contribution);
    let mut parts = component.label.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("filter"), None, None) => format!("structural filters only {}", gain),
        (Some(criterion), Some(tier), Some(level)) => {
            let field = match tier {
                "text" => "visible text",
                "accessible" => "accessible name",
                "attribute" => "attribute",
                other => other,
            };
            let suffix = if criterion == "name" { " (name query)" } else { "" };
            format!("{} {} match{} {}", level, field, suffix, gain)
        }
        _ => format!("{} {}", component.label, gain),
    }
}

fn format_gain(value: f32) -> String {
    format!("+{:.2}", value)
}
