//! Curated skill vocabularies and boundary-aware term matching.
//!
//! Technology entries carry the category the rule-based structurer assigns
//! when it finds them by keyword. Domain entries are all [`SkillCategory::Domain`].
//! The two lists are disjoint.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::models::resume_data::SkillCategory::{
    self, Backend, Cloud, Data, Database, Frontend, Programming, Tools,
};
use crate::models::resume_data::SkillClass;

pub struct VocabEntry {
    pub name: &'static str,
    pub category: SkillCategory,
    pub aliases: &'static [&'static str],
}

const fn tech(
    name: &'static str,
    category: SkillCategory,
    aliases: &'static [&'static str],
) -> VocabEntry {
    VocabEntry {
        name,
        category,
        aliases,
    }
}

const fn domain(name: &'static str, aliases: &'static [&'static str]) -> VocabEntry {
    VocabEntry {
        name,
        category: SkillCategory::Domain,
        aliases,
    }
}

pub static TECHNOLOGY: &[VocabEntry] = &[
    // languages
    tech("Python", Programming, &[]),
    tech("Java", Programming, &[]),
    tech("JavaScript", Programming, &["js", "ecmascript"]),
    tech("TypeScript", Programming, &["ts"]),
    tech("Go", Programming, &["golang"]),
    tech("Rust", Programming, &[]),
    tech("C++", Programming, &["cpp"]),
    tech("C#", Programming, &["csharp"]),
    tech("C", Programming, &[]),
    tech("Ruby", Programming, &[]),
    tech("PHP", Programming, &[]),
    tech("Kotlin", Programming, &[]),
    tech("Swift", Programming, &[]),
    tech("Scala", Programming, &[]),
    tech("R", Programming, &[]),
    tech("Perl", Programming, &[]),
    tech("Bash", Programming, &["shell scripting"]),
    tech("SQL", Database, &[]),
    // frontend
    tech("React", Frontend, &["react.js", "reactjs"]),
    tech("Angular", Frontend, &["angularjs"]),
    tech("Vue", Frontend, &["vue.js", "vuejs"]),
    tech("Svelte", Frontend, &[]),
    tech("Next.js", Frontend, &["nextjs"]),
    tech("HTML", Frontend, &["html5"]),
    tech("CSS", Frontend, &["css3"]),
    tech("Tailwind", Frontend, &["tailwindcss"]),
    tech("Redux", Frontend, &[]),
    // backend
    tech("Node.js", Backend, &["nodejs"]),
    tech("Django", Backend, &[]),
    tech("Flask", Backend, &[]),
    tech("FastAPI", Backend, &[]),
    tech("Spring Boot", Backend, &["spring framework"]),
    tech("Express.js", Backend, &["expressjs"]),
    tech("Rails", Backend, &["ruby on rails"]),
    tech(".NET", Backend, &["dotnet", "asp.net"]),
    tech("GraphQL", Backend, &[]),
    tech("REST APIs", Backend, &["restful", "rest api"]),
    tech("gRPC", Backend, &[]),
    tech("Kafka", Backend, &[]),
    tech("RabbitMQ", Backend, &[]),
    // databases
    tech("PostgreSQL", Database, &["postgres"]),
    tech("MySQL", Database, &[]),
    tech("MongoDB", Database, &["mongo"]),
    tech("Redis", Database, &[]),
    tech("Elasticsearch", Database, &[]),
    tech("SQLite", Database, &[]),
    tech("Oracle", Database, &[]),
    tech("Cassandra", Database, &[]),
    tech("DynamoDB", Database, &[]),
    // cloud and devops
    tech("AWS", Cloud, &["amazon web services"]),
    tech("Azure", Cloud, &[]),
    tech("GCP", Cloud, &["google cloud"]),
    tech("Docker", Cloud, &[]),
    tech("Kubernetes", Cloud, &["k8s"]),
    tech("Terraform", Cloud, &[]),
    tech("Ansible", Cloud, &[]),
    tech("Jenkins", Cloud, &[]),
    tech("CI/CD", Cloud, &[]),
    tech("Linux", Cloud, &[]),
    // data
    tech("Pandas", Data, &[]),
    tech("NumPy", Data, &[]),
    tech("TensorFlow", Data, &[]),
    tech("PyTorch", Data, &[]),
    tech("Scikit-learn", Data, &["sklearn"]),
    tech("Spark", Data, &["pyspark", "apache spark"]),
    tech("Hadoop", Data, &[]),
    tech("Airflow", Data, &[]),
    tech("Tableau", Data, &[]),
    tech("Power BI", Data, &[]),
    // tooling
    tech("Git", Tools, &["github", "gitlab"]),
    tech("Jira", Tools, &[]),
    tech("Webpack", Tools, &[]),
    tech("Figma", Tools, &[]),
    tech("Postman", Tools, &[]),
];

pub static DOMAIN: &[VocabEntry] = &[
    // methodologies
    domain("Agile", &[]),
    domain("Scrum", &[]),
    domain("Kanban", &[]),
    domain("Lean", &[]),
    domain("Six Sigma", &[]),
    domain("Waterfall", &[]),
    // business skills
    domain("Project Management", &[]),
    domain("Product Management", &[]),
    domain("Stakeholder Management", &[]),
    domain("Team Leadership", &["people management"]),
    domain("Strategic Planning", &[]),
    domain("Budgeting", &[]),
    domain("Business Analysis", &[]),
    domain("Requirements Gathering", &[]),
    domain("Risk Management", &[]),
    domain("Change Management", &[]),
    domain("Vendor Management", &[]),
    domain("Negotiation", &[]),
    domain("Communication", &[]),
    domain("Mentoring", &[]),
    domain("Customer Success", &[]),
    domain("Sales", &[]),
    domain("Marketing", &[]),
    // industries
    domain("Fintech", &["financial services"]),
    domain("Healthcare", &[]),
    domain("E-commerce", &["ecommerce"]),
    domain("Banking", &[]),
    domain("Insurance", &[]),
    domain("Telecommunications", &[]),
    domain("Retail", &[]),
    domain("Logistics", &["supply chain"]),
    // certifications
    domain("PMP", &[]),
    domain("CSM", &["certified scrummaster"]),
    domain("CPA", &[]),
    domain("CISSP", &[]),
    domain("ITIL", &[]),
];

const BUSINESS_KEYWORDS: &[&str] = &[
    "management",
    "leadership",
    "strategy",
    "strategic",
    "planning",
    "analysis",
    "business",
    "operations",
    "sales",
    "marketing",
    "finance",
    "compliance",
    "consulting",
    "negotiation",
    "communication",
    "stakeholder",
    "methodology",
];

const FILE_EXTENSIONS: &[&str] = &[
    ".js", ".ts", ".py", ".rs", ".go", ".java", ".net", ".rb", ".sh", ".sql", ".yml", ".yaml",
];

/// Lower-cased term → (vocabulary entry, class).
static INDEX: Lazy<HashMap<String, (&'static VocabEntry, SkillClass)>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for (entries, class) in [
        (TECHNOLOGY, SkillClass::Technology),
        (DOMAIN, SkillClass::Domain),
    ] {
        for entry in entries {
            for term in std::iter::once(&entry.name).chain(entry.aliases.iter()) {
                index.entry(term.to_lowercase()).or_insert((entry, class));
            }
        }
    }
    index
});

pub fn lookup(skill: &str) -> Option<(&'static VocabEntry, SkillClass)> {
    INDEX.get(skill.trim().to_lowercase().as_str()).copied()
}

/// Vocabulary first, then heuristics: a version number or file-extension-like
/// token means technology; business keywords or three or more words mean
/// domain; anything else is technology.
pub fn classify_skill(skill: &str) -> SkillClass {
    if let Some((_, class)) = lookup(skill) {
        return class;
    }

    let lower = skill.trim().to_lowercase();
    let has_version = lower
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .any(|tok| {
            let tok = tok.trim_start_matches('v');
            tok.chars().next().is_some_and(|c| c.is_ascii_digit())
                && tok.chars().all(|c| c.is_ascii_digit() || c == '.')
        })
        || lower
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_digit())
            && lower.chars().any(|c| c.is_alphabetic());
    let has_extension = FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext));
    if has_version || has_extension {
        return SkillClass::Technology;
    }

    let has_business_word = lower
        .split_whitespace()
        .any(|w| BUSINESS_KEYWORDS.contains(&w));
    if has_business_word || lower.split_whitespace().count() >= 3 {
        return SkillClass::Domain;
    }

    SkillClass::Technology
}

/// Canonical display name for a known skill, or the trimmed input.
pub fn canonical_name(skill: &str) -> String {
    lookup(skill)
        .map(|(entry, _)| entry.name.to_string())
        .unwrap_or_else(|| skill.trim().to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Term matching
// ────────────────────────────────────────────────────────────────────────────

fn is_term_char(c: char) -> bool {
    c.is_alphanumeric() || c == '+' || c == '#'
}

/// Byte offsets of whole-term occurrences of `needle_lower` in `haystack_lower`.
/// Both arguments must already be lower-cased. A term boundary is any
/// character that is not alphanumeric, `+` or `#`, so "java" does not match
/// inside "javascript" and "c" does not match inside "c++".
pub fn term_positions(haystack_lower: &str, needle_lower: &str) -> Vec<usize> {
    if needle_lower.is_empty() {
        return Vec::new();
    }
    haystack_lower
        .match_indices(needle_lower)
        .filter(|(start, _)| {
            let end = start + needle_lower.len();
            let before_ok = haystack_lower[..*start]
                .chars()
                .next_back()
                .map_or(true, |c| !is_term_char(c));
            let after = haystack_lower[end..].chars().next();
            // A trailing '.' still ends a term ("Python."), unless a letter follows it.
            let after_ok = match after {
                None => true,
                Some('.') => !haystack_lower[end + 1..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphanumeric()),
                Some(c) => !is_term_char(c),
            };
            before_ok && after_ok
        })
        .map(|(start, _)| start)
        .collect()
}

pub fn count_term(haystack_lower: &str, needle_lower: &str) -> usize {
    term_positions(haystack_lower, needle_lower).len()
}

/// Single-letter names ("C", "R") are too ambiguous for lower-cased matching
/// and are only found with their exact case.
fn entry_found(entry: &VocabEntry, text: &str, text_lower: &str) -> bool {
    std::iter::once(&entry.name)
        .chain(entry.aliases.iter())
        .any(|term| {
            if term.chars().count() <= 2 {
                !term_positions(text, term).is_empty()
            } else {
                !term_positions(text_lower, &term.to_lowercase()).is_empty()
            }
        })
}

/// Every vocabulary entry mentioned in `text`, technology first, each once.
pub fn keyword_scan(text: &str) -> Vec<&'static VocabEntry> {
    let lower = text.to_lowercase();
    TECHNOLOGY
        .iter()
        .chain(DOMAIN.iter())
        .filter(|entry| entry_found(entry, text, &lower))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabularies_are_disjoint() {
        for t in TECHNOLOGY {
            for term in std::iter::once(&t.name).chain(t.aliases.iter()) {
                assert!(
                    !DOMAIN.iter().any(|d| d.name.eq_ignore_ascii_case(term)
                        || d.aliases.iter().any(|a| a.eq_ignore_ascii_case(term))),
                    "{term} is in both vocabularies"
                );
            }
        }
    }

    #[test]
    fn test_classify_vocabulary_hits() {
        assert_eq!(classify_skill("python"), SkillClass::Technology);
        assert_eq!(classify_skill("PostgreSQL"), SkillClass::Technology);
        assert_eq!(classify_skill("Agile"), SkillClass::Domain);
        assert_eq!(classify_skill("stakeholder management"), SkillClass::Domain);
    }

    #[test]
    fn test_classify_heuristics() {
        assert_eq!(classify_skill("Vite 5.2"), SkillClass::Technology);
        assert_eq!(classify_skill("Deno.js"), SkillClass::Technology);
        assert_eq!(classify_skill("Payments Operations"), SkillClass::Domain);
        assert_eq!(classify_skill("cross functional team building"), SkillClass::Domain);
        assert_eq!(classify_skill("Zig"), SkillClass::Technology);
    }

    #[test]
    fn test_term_positions_respect_boundaries() {
        let text = "java, javascript and java. c++ or c";
        assert_eq!(count_term(text, "java"), 2);
        assert_eq!(count_term(text, "javascript"), 1);
        assert_eq!(count_term(text, "c++"), 1);
        assert_eq!(count_term(text, "c"), 1);
    }

    #[test]
    fn test_keyword_scan_finds_vocabulary_terms() {
        let found: Vec<&str> = keyword_scan("Skills: Python, React, PostgreSQL. Agile teams.")
            .iter()
            .map(|e| e.name)
            .collect();
        assert!(found.contains(&"Python"));
        assert!(found.contains(&"React"));
        assert!(found.contains(&"PostgreSQL"));
        assert!(found.contains(&"Agile"));
        assert!(!found.contains(&"Java"));
        assert!(!found.contains(&"C"));
    }

    #[test]
    fn test_canonical_name_uses_vocabulary_spelling() {
        assert_eq!(canonical_name("postgres"), "PostgreSQL");
        assert_eq!(canonical_name("  Zig "), "Zig");
    }
}
