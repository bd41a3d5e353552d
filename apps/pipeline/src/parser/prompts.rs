// Prompts for the resume structurer.

use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, NO_FABRICATION_INSTRUCTION};

/// Characters of resume text sent to the model.
pub const PROMPT_TEXT_CHARS: usize = 6000;

pub fn structure_system() -> String {
    format!(
        "{JSON_ONLY_SYSTEM} You are an expert resume parser working for a recruiting platform. \
         {NO_FABRICATION_INSTRUCTION}"
    )
}

/// `{entities}` is a JSON object, `{examples}` is either empty or an
/// exemplar block, `{resume_text}` is the truncated resume.
pub const STRUCTURE_PROMPT_TEMPLATE: &str = r#"Extract the resume below into ONE JSON object with exactly these keys:

{
  "personal_info": {"name": string|null, "email": string|null, "phone": string|null,
                    "location": string|null, "linkedin": string|null, "github": string|null,
                    "portfolio": string|null},
  "summary": string|null,
  "experience": [{"title": string|null, "company": string|null, "location": string|null,
                  "start_date": string|null, "end_date": string|null, "current": boolean,
                  "description": string|null, "achievements": [string]}],
  "education": [{"degree": string|null, "institution": string|null, "location": string|null,
                 "graduation_date": string|null, "grade": string|null}],
  "skills": [{"name": string,
              "category": "programming"|"frontend"|"backend"|"database"|"cloud"|"data"|"tools"|"other"|"domain",
              "proficiency": "beginner"|"intermediate"|"advanced"|"expert"|null}],
  "certifications": [string],
  "languages": [string],
  "total_years_experience": number|null,
  "ai_summary": string|null,
  "key_strengths": [string]
}

Rules:
- List experience most recent first. Dates as written ("Jan 2020", "2019", "Present").
- "current" is true only for a role with no end date or an end date of Present.
- "ai_summary" is two sentences describing the candidate; "key_strengths" has at most five items.
- Prefer the pre-extracted entities for contact details when they agree with the text.

Pre-extracted entities:
{entities}
{examples}
Resume text:
"""
{resume_text}
""""#;

/// One exemplar of a recruiter-verified extraction.
pub const EXAMPLE_TEMPLATE: &str = r#"Example {n} (verified):
Resume excerpt:
"""
{excerpt}
"""
Extraction:
{structured}
"#;

pub const EXAMPLES_HEADER: &str =
    "\nThe following verified extractions of similar resumes show the expected output style:\n\n";

/// Characters of each exemplar's raw text included in the prompt.
pub const EXAMPLE_EXCERPT_CHARS: usize = 1500;
