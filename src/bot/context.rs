//! Deterministic context heuristics
//!
//! Runs on every turn before (and independently of) the model call:
//! detects mentioned products, sizes and quantities, keeps the session
//! context current, and resolves vague references against it. The user's
//! literal message is never rewritten; resolutions travel as a prompt
//! annotation.

// lazy_regex! validates patterns at compile time via once_cell statics
#![allow(clippy::non_std_lazy_statics)]

use crate::config::MAX_DISCUSSED_SUBJECTS;
use crate::store::{ConversationContext, Phase};
use chrono::Utc;
use lazy_regex::lazy_regex;

/// Known products and their colloquial variants, misspellings included.
const PRODUCT_PATTERNS: &[(&str, &[&str])] = &[
    ("Maracuyá", &["maracuya", "maracuyá", "passion", "parcha"]),
    ("Pavé de Milo", &["milo", "chocolate", "choco", "cacao"]),
    ("Arequipe", &["arequipe", "areqipe", "dulce de leche", "manjar"]),
    ("Leche Klim", &["klim", "leche klim", "leche"]),
];

/// Known sizes and their spoken forms.
const SIZE_PATTERNS: &[(&str, &[&str])] = &[
    ("8 Onzas", &["8", "ocho", "chico", "pequeño", "small"]),
    ("16 Onzas", &["16", "dieciseis", "dieciséis", "grande", "large", "big"]),
];

static RE_QUANTITY: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"\b(uno|una|dos|tres|cuatro|cinco|\d+)\b");

static RE_SIZE_TOKEN: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"\b(8|16|ocho|dieciséis|dieciseis)\b");

/// Extracts the canonical names of products mentioned in the message.
#[must_use]
pub fn extract_products(message: &str) -> Vec<String> {
    let lower = message.to_lowercase();
    let mut detected = Vec::new();
    for (name, variants) in PRODUCT_PATTERNS {
        if variants.iter().any(|v| lower.contains(v)) && !detected.iter().any(|d| d == name) {
            detected.push((*name).to_string());
        }
    }
    detected
}

/// Extracts the canonical sizes mentioned in the message.
#[must_use]
pub fn extract_sizes(message: &str) -> Vec<String> {
    let lower = message.to_lowercase();
    let mut detected = Vec::new();
    for (name, variants) in SIZE_PATTERNS {
        if variants.iter().any(|v| lower.contains(v)) && !detected.iter().any(|d| d == name) {
            detected.push((*name).to_string());
        }
    }
    detected
}

/// Updates the context from one inbound message.
///
/// Product mentions replace the discussed list (the list tracks the most
/// recent product-bearing message), capped at `MAX_DISCUSSED_SUBJECTS`.
pub fn absorb_message(ctx: &mut ConversationContext, message: &str) {
    let products = extract_products(message);
    let sizes = extract_sizes(message);

    if !products.is_empty() {
        ctx.discussed_subjects = products.clone();
        ctx.discussed_subjects.truncate(MAX_DISCUSSED_SUBJECTS);
        ctx.last_topic = Some("eligiendo_productos".to_string());
        if ctx.phase == Phase::Greeting {
            ctx.phase = Phase::Browsing;
        }
    }

    if !sizes.is_empty() {
        ctx.mentioned_sizes = sizes;
        if !products.is_empty() {
            ctx.last_topic = Some("especificando_tamaños".to_string());
        }
        if !ctx.discussed_subjects.is_empty() && ctx.phase == Phase::Browsing {
            ctx.phase = Phase::Ordering;
        }
    }

    // Quantities without products only matter when something was discussed.
    if products.is_empty()
        && RE_QUANTITY.is_match(&message.to_lowercase())
        && !ctx.discussed_subjects.is_empty()
    {
        ctx.last_topic = Some("especificando_cantidades".to_string());
    }

    ctx.updated_at = Utc::now();
}

/// Resolves a vague reference against the context.
///
/// Returns a clarifying interpretation to annotate the model prompt with,
/// or `None` when the message is unambiguous on its own.
#[must_use]
pub fn resolve_vague_reference(message: &str, ctx: &ConversationContext) -> Option<String> {
    let lower = message.to_lowercase();

    // Already annotated upstream, do not stack interpretations.
    if lower.contains("interpreto que quieres") {
        return None;
    }

    let sizes: Vec<&str> = RE_SIZE_TOKEN
        .find_iter(&lower)
        .map(|m| normalize_size(m.as_str()))
        .collect();
    let products_in_message = extract_products(message);
    let discussed = &ctx.discussed_subjects;

    // Bare sizes with exactly one product in context.
    if !sizes.is_empty() && discussed.len() == 1 && products_in_message.is_empty() {
        let flavor = &discussed[0];
        let pairs: Vec<String> = sizes.iter().map(|s| format!("{flavor} {s}")).collect();
        return Some(format!("Interpreto que quieres: {}", pairs.join(", ")));
    }

    // Bare quantities with one product and no size yet.
    let quantities: Vec<&str> = RE_QUANTITY.find_iter(&lower).map(|m| m.as_str()).collect();
    if !quantities.is_empty()
        && discussed.len() == 1
        && products_in_message.is_empty()
        && sizes.is_empty()
    {
        let flavor = &discussed[0];
        return Some(format!(
            "Interpreto que quieres {} de {flavor}, pero ¿de qué tamaño?",
            quantities.join(", ")
        ));
    }

    // Pronoun-style references to the last product.
    const SAME_AGAIN: &[&str] = &["el mismo", "igual", "también", "otro igual"];
    if SAME_AGAIN.iter().any(|w| lower.contains(w)) {
        if let Some(first) = discussed.first() {
            return Some(format!("Interpreto que quieres otro {first}"));
        }
    }

    None
}

fn normalize_size(token: &str) -> &'static str {
    if token.contains('8') || token.contains("ocho") {
        "8oz"
    } else {
        "16oz"
    }
}
