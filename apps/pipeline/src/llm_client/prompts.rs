// Shared prompt fragments.
// Each component that calls the LLM keeps its own prompts.rs alongside it;
// this file only holds cross-cutting pieces.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Respond with a single JSON object. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction against inventing data that is not in the source text.
pub const NO_FABRICATION_INSTRUCTION: &str = "\
    CRITICAL: Extract only what the document states. Do NOT infer, interpolate, \
    or invent names, employers, dates or skills. Use null for missing scalar \
    fields and [] for missing lists.";
