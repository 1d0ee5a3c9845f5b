//! Post-translation corrections.
//! Layer 1: built-in European-Portuguese glossary (Brazilian vocabulary → PT-PT).
//! Layer 2: override rules, best-effort: when the source mentions a rule
//! pattern, known renderings of that pattern in the output are replaced.

use regex::{Captures, Regex};

use super::rules::RuleSet;
use super::Language;

/// (pattern, replacement) pairs applied to Portuguese output, in order.
/// `(?i)` marks entries that match regardless of case.
const PT_GLOSSARY: &[(&str, &str)] = &[
    (r"\bQuotes\b", "Orçamentos"),
    (r"\bQuote\b", "Orçamento"),
    (r"\bquotes\b", "orçamentos"),
    (r"\bquote\b", "orçamento"),
    // PT-PT drops "você" before the verb
    (r"\bVocê tem\b", "Tem"),
    (r"\bvocê tem\b", "tem"),
    (r"\bVocê está\b", "Está"),
    (r"\bvocê está\b", "está"),
    (r"\bVocê pode\b", "Pode"),
    (r"\bvocê pode\b", "pode"),
    (r"\bVocê deve\b", "Deve"),
    (r"\bvocê deve\b", "deve"),
    (r"\bVocê precisa\b", "Precisa"),
    (r"\bvocê precisa\b", "precisa"),
    (r"\bContato\b", "Contacto"),
    (r"(?i)\bcontato\b", "contacto"),
    (r"(?i)\bconosco\b", "connosco"),
    (r"\bAluguel\b", "Aluguer"),
    (r"(?i)\baluguel\b", "aluguer"),
    (r"\bCelular\b", "Telemóvel"),
    (r"(?i)\bcelular\b", "telemóvel"),
    (r"\bÔnibus\b", "Autocarro"),
    (r"(?i)\bônibus\b", "autocarro"),
    (r"\bfato\b", "facto"),
    (r"\bFato\b", "Facto"),
    (r"\btrem\b", "comboio"),
    (r"\bTrem\b", "Comboio"),
    (r"(?i)\bxícara\b", "chávena"),
    (r"\bGeladeira\b", "Frigorífico"),
    (r"(?i)\bgeladeira\b", "frigorífico"),
    (r"\bBanheiro\b", "Casa de banho"),
    (r"(?i)\bbanheiro\b", "casa de banho"),
    (r"\btime\b", "equipa"),
    (r"\bTime\b", "Equipa"),
    (r"\btimes\b", "equipas"),
    (r"\bTimes\b", "Equipas"),
    (r"\bUsuários\b", "Utilizadores"),
    (r"(?i)\busuários\b", "utilizadores"),
    (r"\bUsuário\b", "Utilizador"),
    (r"(?i)\busuário\b", "utilizador"),
    (r"\bEquipes\b", "Equipas"),
    (r"(?i)\bequipes\b", "equipas"),
    (r"\bEquipe\b", "Equipa"),
    (r"(?i)\bequipe\b", "equipa"),
    (r"\bArquivos\b", "Ficheiros"),
    (r"(?i)\barquivos\b", "ficheiros"),
    (r"\bArquivo\b", "Ficheiro"),
    (r"(?i)\barquivo\b", "ficheiro"),
    (r"\bMouse\b", "Rato"),
    (r"(?i)\bmouse\b", "rato"),
    (r"\bTela\b", "Ecrã"),
    (r"(?i)\btela\b", "ecrã"),
];

/// Likely provider renderings of rule patterns, by lowercase pattern.
const PROBABLE_RENDERINGS: &[(&str, &[&str])] = &[
    ("quote", &["citação", "cotação", "proposta", "orçamento"]),
    ("quotes", &["citações", "cotações", "propostas", "orçamentos"]),
];

struct GlossaryRule {
    pattern: Regex,
    replacement: &'static str,
}

/// Compiled post-processing tables.
pub struct PostProcessor {
    pt_glossary: Vec<GlossaryRule>,
    renderings: Vec<(&'static str, Vec<Regex>)>,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor {
    pub fn new() -> Self {
        let pt_glossary = PT_GLOSSARY
            .iter()
            .map(|(pattern, replacement)| GlossaryRule {
                pattern: Regex::new(pattern).unwrap(),
                replacement,
            })
            .collect();

        let renderings = PROBABLE_RENDERINGS
            .iter()
            .map(|(pattern, words)| {
                let regexes = words
                    .iter()
                    .map(|w| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(w))).unwrap())
                    .collect();
                (*pattern, regexes)
            })
            .collect();

        Self {
            pt_glossary,
            renderings,
        }
    }

    /// Full post-processing: glossary first, then override rules.
    pub fn apply(
        &self,
        translated: &str,
        source: &str,
        target: Language,
        rules: &RuleSet,
    ) -> String {
        let corrected = self.apply_glossary(translated, target);
        self.apply_override_rules(&corrected, source, rules)
    }

    /// Built-in dialect corrections; only Portuguese has a table.
    pub fn apply_glossary(&self, text: &str, target: Language) -> String {
        if target != Language::Pt {
            return text.to_string();
        }
        let mut out = text.to_string();
        for rule in &self.pt_glossary {
            if rule.pattern.is_match(&out) {
                out = rule.pattern.replace_all(&out, rule.replacement).into_owned();
            }
        }
        out
    }

    /// Replace known renderings of every rule pattern the source mentions.
    pub fn apply_override_rules(&self, translated: &str, source: &str, rules: &RuleSet) -> String {
        let source_lower = source.to_lowercase();
        let mut out = translated.to_string();

        for (pattern, replacement) in rules.iter() {
            let pattern_lower = pattern.to_lowercase();
            if !source_lower.contains(&pattern_lower) {
                continue;
            }
            let Some((_, regexes)) = self.renderings.iter().find(|(p, _)| *p == pattern_lower)
            else {
                continue;
            };
            let replacement_lower = replacement.to_lowercase();
            for re in regexes {
                out = re
                    .replace_all(&out, |caps: &Captures| {
                        match_case(&caps[0], &replacement_lower)
                    })
                    .into_owned();
            }
        }
        out
    }
}

/// Exact (trimmed, case-insensitive) rule match, with the input's casing.
pub fn exact_rule_match(text: &str, rules: &RuleSet) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    rules
        .iter()
        .find(|(pattern, _)| pattern.trim().to_lowercase() == lower)
        .map(|(_, replacement)| adjust_case(trimmed, replacement))
}

/// Casing of an exact-match replacement:
/// all caps (len > 1) → upper; leading non-lowercase → Capitalized; else lower.
fn adjust_case(input: &str, replacement: &str) -> String {
    let is_all_caps = input.chars().count() > 1 && input == input.to_uppercase();
    if is_all_caps {
        return replacement.to_uppercase();
    }
    match input.chars().next() {
        Some(first) if !first.is_lowercase() => capitalize(&replacement.to_lowercase()),
        _ => replacement.to_lowercase(),
    }
}

/// Casing of a fuzzy replacement, copied from the matched word.
fn match_case(matched: &str, replacement_lower: &str) -> String {
    if matched == matched.to_uppercase() {
        replacement_lower.to_uppercase()
    } else if matched.chars().next().is_some_and(char::is_uppercase) {
        capitalize(replacement_lower)
    } else {
        replacement_lower.to_string()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
