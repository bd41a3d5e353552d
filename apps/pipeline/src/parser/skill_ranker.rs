//! Skill Ranker: scores every extracted skill and splits the results into
//! top-N technology and top-N domain lists.
//!
//! Score out of 100:
//!   frequency   25  (5 points per occurrence, capped)
//!   recency     30  (1.0 / 0.8 / 0.6 for the three latest roles, 0.3 older, 0.1 absent)
//!   context     25  (title 0.4, achievements 0.3, skills section 0.2, summary 0.1)
//!   proficiency 20  (indicator word within 20 / 50 / further chars; 0.5 with none)

use std::collections::HashSet;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::resume_data::{
    Experience, RankedSkill, RankingMetadata, ScoreBreakdown, Skill, SkillClass,
};
use crate::parser::vocabulary::{canonical_name, classify_skill, count_term, term_positions};

pub const DEFAULT_TOP_N: usize = 5;

const FREQUENCY_WEIGHT: f64 = 25.0;
const FREQUENCY_PER_HIT: f64 = 5.0;
const RECENCY_WEIGHT: f64 = 30.0;
const CONTEXT_WEIGHT: f64 = 25.0;
const PROFICIENCY_WEIGHT: f64 = 20.0;

const RECENT_ROLE_FACTORS: [f64; 3] = [1.0, 0.8, 0.6];
const OLDER_ROLE_FACTOR: f64 = 0.3;
const ABSENT_FACTOR: f64 = 0.1;

const PROFICIENCY_INDICATORS: &[&str] = &[
    "expert",
    "expertise",
    "senior",
    "lead",
    "principal",
    "staff",
    "architect",
    "proficient",
    "advanced",
    "deep",
    "strong",
    "proven",
    "extensive",
    "mastery",
    "specialist",
];

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?;]+(?:\s+|$)|\n+").expect("valid sentence regex"));

// ────────────────────────────────────────────────────────────────────────────
// Section detection
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    Summary,
    Skills,
    Experience,
    Achievements,
    Education,
}

fn heading_section(label: &str) -> Option<Section> {
    let label = label.trim().trim_end_matches(':').trim().to_lowercase();
    if label.is_empty() || label.split_whitespace().count() > 4 {
        return None;
    }
    let has = |words: &[&str]| words.iter().any(|w| label.contains(w));
    if has(&["achievement", "responsibilit", "accomplishment", "highlights"]) {
        Some(Section::Achievements)
    } else if has(&["skill", "technologies", "tech stack", "competenc", "tools"]) {
        Some(Section::Skills)
    } else if has(&["experience", "employment", "work history", "career"]) {
        Some(Section::Experience)
    } else if has(&["summary", "profile", "objective", "about"]) {
        Some(Section::Summary)
    } else if has(&["education", "academic", "certification"]) {
        Some(Section::Education)
    } else {
        None
    }
}

/// Lower-cased text of each resume section that feeds the context score.
#[derive(Debug, Default)]
struct SectionText {
    titles: String,
    achievements: String,
    skills: String,
    summary: String,
}

fn split_sections(text: &str, experience: &[Experience]) -> SectionText {
    let mut out = SectionText::default();
    let mut current = Section::Other;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // "Skills: Python, React" is a heading with inline content.
        let (section, body) = match trimmed.split_once(':') {
            Some((head, rest)) if heading_section(head).is_some() => {
                (heading_section(head), rest.trim())
            }
            _ => (heading_section(trimmed), ""),
        };
        if let Some(section) = section {
            current = section;
            if body.is_empty() {
                continue;
            }
        }
        let content = if section.is_some() { body } else { trimmed };

        let target = match current {
            Section::Summary => &mut out.summary,
            Section::Skills => &mut out.skills,
            Section::Achievements => &mut out.achievements,
            Section::Experience if is_bullet(line) => &mut out.achievements,
            _ => continue,
        };
        target.push_str(&content.to_lowercase());
        target.push('\n');
    }

    for role in experience {
        if let Some(title) = &role.title {
            out.titles.push_str(&title.to_lowercase());
            out.titles.push('\n');
        }
        for part in role.description.iter().chain(role.achievements.iter()) {
            out.achievements.push_str(&part.to_lowercase());
            out.achievements.push('\n');
        }
    }
    out
}

fn is_bullet(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with(&['-', '*', '•', '●', '▪', '–'][..])
}

// ────────────────────────────────────────────────────────────────────────────
// Scoring
// ────────────────────────────────────────────────────────────────────────────

fn mentions(section_lower: &str, skill: &str) -> bool {
    !term_positions(section_lower, &skill.to_lowercase()).is_empty()
}

fn recency_factor(skill: &str, experience: &[Experience]) -> f64 {
    let roles: Vec<String> = experience.iter().map(Experience::searchable_text).collect();
    match roles.iter().position(|text| mentions(text, skill)) {
        Some(idx) if idx < RECENT_ROLE_FACTORS.len() => RECENT_ROLE_FACTORS[idx],
        Some(_) => OLDER_ROLE_FACTOR,
        None => ABSENT_FACTOR,
    }
}

fn context_factor(skill: &str, sections: &SectionText) -> f64 {
    let mut factor = 0.0;
    if mentions(&sections.titles, skill) {
        factor += 0.4;
    }
    if mentions(&sections.achievements, skill) {
        factor += 0.3;
    }
    if mentions(&sections.skills, skill) {
        factor += 0.2;
    }
    if mentions(&sections.summary, skill) {
        factor += 0.1;
    }
    f64::min(factor, 1.0)
}

/// Closest indicator distance across sentences that mention the skill.
fn proficiency_factor(text_lower: &str, skill: &str) -> f64 {
    let needle = skill.to_lowercase();
    let mut appears = false;
    let mut best: Option<usize> = None;

    for sentence in SENTENCE_SPLIT.split(text_lower) {
        let skill_hits = term_positions(sentence, &needle);
        if skill_hits.is_empty() {
            continue;
        }
        appears = true;
        for indicator in PROFICIENCY_INDICATORS {
            for ind in term_positions(sentence, indicator) {
                for &hit in &skill_hits {
                    let distance = hit.abs_diff(ind);
                    best = Some(best.map_or(distance, |b| b.min(distance)));
                }
            }
        }
    }

    match best {
        Some(d) if d < 20 => 1.0,
        Some(d) if d < 50 => 0.8,
        Some(_) => 0.6,
        None if appears => 0.5,
        None => 0.0,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Full score for one skill.
pub fn score_skill(
    skill: &str,
    text: &str,
    experience: &[Experience],
) -> (f64, u32, ScoreBreakdown) {
    let text_lower = text.to_lowercase();
    let sections = split_sections(text, experience);
    score_with(skill, &text_lower, &sections, experience)
}

fn score_with(
    skill: &str,
    text_lower: &str,
    sections: &SectionText,
    experience: &[Experience],
) -> (f64, u32, ScoreBreakdown) {
    // Word-bounded, so "C" never counts inside "CSS" or "c++".
    let occurrences = count_term(text_lower, &skill.to_lowercase()) as u32;
    let breakdown = ScoreBreakdown {
        frequency: f64::min(FREQUENCY_PER_HIT * occurrences as f64, FREQUENCY_WEIGHT),
        recency: round2(recency_factor(skill, experience) * RECENCY_WEIGHT),
        context: round2(context_factor(skill, sections) * CONTEXT_WEIGHT),
        proficiency: round2(proficiency_factor(text_lower, skill) * PROFICIENCY_WEIGHT),
    };
    let total = breakdown.frequency + breakdown.recency + breakdown.context + breakdown.proficiency;
    (round2(total), occurrences, breakdown)
}

#[derive(Debug, Clone)]
pub struct SkillRanking {
    pub technology: Vec<RankedSkill>,
    pub domain: Vec<RankedSkill>,
    pub metadata: RankingMetadata,
}

#[derive(Debug, Clone)]
pub struct SkillRanker {
    top_n: usize,
}

impl Default for SkillRanker {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N)
    }
}

impl SkillRanker {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    pub fn rank(&self, text: &str, skills: &[Skill], experience: &[Experience]) -> SkillRanking {
        let text_lower = text.to_lowercase();
        let sections = split_sections(text, experience);

        let mut seen = HashSet::new();
        let mut technology = Vec::new();
        let mut domain = Vec::new();

        for skill in skills {
            let name = canonical_name(&skill.name);
            if name.is_empty() || !seen.insert(name.to_lowercase()) {
                continue;
            }
            let (score, occurrences, breakdown) =
                score_with(&name, &text_lower, &sections, experience);
            let class = classify_skill(&name);
            let ranked = RankedSkill {
                name,
                score,
                class,
                occurrences,
                breakdown,
            };
            match class {
                SkillClass::Technology => technology.push(ranked),
                SkillClass::Domain => domain.push(ranked),
            }
        }

        let metadata = RankingMetadata {
            total_skills_analyzed: seen.len(),
            technology_skills_found: technology.len(),
            domain_skills_found: domain.len(),
            top_n: self.top_n,
            ranked_at: Utc::now(),
        };

        SkillRanking {
            technology: top(technology, self.top_n),
            domain: top(domain, self.top_n),
            metadata,
        }
    }
}

fn top(mut skills: Vec<RankedSkill>, n: usize) -> Vec<RankedSkill> {
    skills.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.name.cmp(&b.name))
    });
    skills.truncate(n);
    skills
}
