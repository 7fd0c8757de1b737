use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;

// Metadata keys are removed together with their scalar value; content keys
// only lose the key, so the text they carry survives the strip.
static METADATA_FIELD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#""(?:model|created_at|done|done_reason|role|total_duration|load_duration|prompt_eval_count|prompt_eval_duration|eval_count|eval_duration|context)"\s*:\s*(?:"(?:[^"\\]|\\.)*"|\[[^\]]*\]|-?[0-9][0-9.eE+-]*|true|false|null)"#,
    )
    .ok()
});
static CONTENT_KEY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""(?:response|message|content|thinking|images|tool_calls|error)"\s*:"#).ok()
});
static ESCAPE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"\\[nrt"\\/]"#).ok());
static SYNTAX_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"[{}\[\]"]"#).ok());

#[inline]
fn blank_matches<'a>(re: &Option<Regex>, text: &'a str) -> Cow<'a, str> {
    match re {
        Some(re) => re.replace_all(text, " "),
        None => Cow::Borrowed(text),
    }
}

/// Strip JSON syntax from `text`, leaving the human-readable residue.
///
/// Removes braces, brackets, quotes, escape sequences, known field names,
/// metadata fields with their values, boolean/null literals and the model name
/// token, then collapses whitespace. Applying it to its own output is a no-op.
#[must_use]
pub fn remove_json_artifacts(text: &str, model: Option<&str>) -> String {
    let stripped = blank_matches(&METADATA_FIELD_RE, text);
    let stripped = blank_matches(&CONTENT_KEY_RE, &stripped);
    let stripped = blank_matches(&ESCAPE_RE, &stripped);
    let stripped = blank_matches(&SYNTAX_RE, &stripped);

    let model = model.map(str::trim).filter(|model| !model.is_empty());
    let model_base = model.and_then(|model| model.split_once(':').map(|(base, _)| base));

    let mut out = String::with_capacity(stripped.len());
    for token in stripped.split_whitespace() {
        if is_artifact_token(token, model, model_base) {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(token);
    }
    out
}

#[inline]
fn is_artifact_token(token: &str, model: Option<&str>, model_base: Option<&str>) -> bool {
    let core = token.trim_matches(|c| c == ',' || c == ':');
    core.is_empty()
        || matches!(core, "true" | "false" | "null")
        || model.is_some_and(|model| core == model)
        || model_base.is_some_and(|base| core == base)
}
