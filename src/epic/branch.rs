//! Branch naming: the integration-branch template and the branch-name
//! validator gating everything we hand to the VCS.

use minijinja::Environment;
use regex::Regex;
use serde::Serialize;

use crate::error::GtError;

/// Default integration branch template.
pub const DEFAULT_INTEGRATION_TEMPLATE: &str = "integration/{{epic}}";

/// Variables available to the integration branch template.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BranchContext {
    pub epic: String,
    pub ticket: String,
    pub user: String,
}

const KNOWN_VARS: &[&str] = &["epic", "ticket", "user"];

/// Render a branch template. Unknown `{{var}}` references are left as
/// literal text rather than erroring or vanishing; the result must pass
/// [`validate_branch_name`].
pub fn render_branch_template(template: &str, ctx: &BranchContext) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template("branch", template)
        .map_err(|e| GtError::Invalid(format!("bad branch template: {e}")))?;

    // Feed unknown variables their own literal spelling so they survive
    // rendering untouched.
    let var_ref = Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("static regex");
    let mut context = minijinja::value::Value::from_serialize(ctx);
    let mut extra = std::collections::BTreeMap::new();
    for caps in var_ref.captures_iter(template) {
        let name = caps[1].to_string();
        if !KNOWN_VARS.contains(&name.as_str()) {
            extra.insert(name.clone(), format!("{{{{{name}}}}}"));
        }
    }
    if !extra.is_empty() {
        context = minijinja::value::Value::from_serialize(&MergedContext {
            epic: &ctx.epic,
            ticket: &ctx.ticket,
            user: &ctx.user,
            extra,
        });
    }

    let rendered = env
        .get_template("branch")
        .map_err(|e| GtError::Invalid(format!("bad branch template: {e}")))?
        .render(context)
        .map_err(|e| GtError::Invalid(format!("branch template render failed: {e}")))?;

    validate_branch_name(&rendered)?;
    Ok(rendered)
}

#[derive(Serialize)]
struct MergedContext<'a> {
    epic: &'a str,
    ticket: &'a str,
    user: &'a str,
    #[serde(flatten)]
    extra: std::collections::BTreeMap<String, String>,
}

/// Enforce the branch-name rules: nonempty, no whitespace, no
/// leading/trailing `/` or `.`, no `..` or `//`, none of `` ~^:?*[\ ``, no
/// `.lock` suffix, at most 200 characters.
pub fn validate_branch_name(name: &str) -> anyhow::Result<()> {
    let fail = |why: &str| -> anyhow::Result<()> {
        Err(GtError::Invalid(format!("bad branch name {name:?}: {why}")).into())
    };

    if name.is_empty() {
        return fail("empty");
    }
    if name.chars().count() > 200 {
        return fail("longer than 200 characters");
    }
    if name.chars().any(char::is_whitespace) {
        return fail("contains whitespace");
    }
    if name.starts_with('/') || name.ends_with('/') {
        return fail("leading or trailing slash");
    }
    if name.starts_with('.') || name.ends_with('.') {
        return fail("leading or trailing dot");
    }
    if name.contains("..") || name.contains("//") {
        return fail("contains '..' or '//'");
    }
    if let Some(bad) = name.chars().find(|c| "~^:?*[\\".contains(*c)) {
        return fail(&format!("contains {bad:?}"));
    }
    if name.ends_with(".lock") {
        return fail("'.lock' suffix");
    }
    Ok(())
}

/// PR branch for a plan step: `polecat/<slug>/<step-ref>`, ASCII lowercase
/// and hyphen-separated.
pub fn pr_branch_name(epic_slug: &str, step_ref: &str) -> anyhow::Result<String> {
    let name = format!("polecat/{}/{}", slugify(epic_slug), slugify(step_ref));
    validate_branch_name(&name)?;
    Ok(name)
}

/// Lowercase ASCII with hyphens; anything else collapses to a single hyphen.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_hyphen = true;
    for ch in text.chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => Some(ch),
            'A'..='Z' => Some(ch.to_ascii_lowercase()),
            _ => None,
        };
        match mapped {
            Some(c) => {
                out.push(c);
                last_hyphen = false;
            }
            None if !last_hyphen => {
                out.push('-');
                last_hyphen = true;
            }
            None => {}
        }
    }
    out.trim_end_matches('-').to_string()
}
