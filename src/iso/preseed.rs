//! Preseed rendering and validation.
//!
//! Templates use `${KEY}` placeholders. A placeholder ending in `_CRYPTED`
//! is satisfied either by that key directly or by hashing the key without
//! the suffix, so plain passwords can live in the secrets file while the
//! ISO only ever carries the crypt hash.

use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::config::Secrets;
use crate::process::Cmd;

/// Template shipped with the binary (`homelab iso init-preseed`).
pub const BUNDLED_TEMPLATE: &str = include_str!("../../templates/preseed.cfg.tmpl");

/// Where the preseed lands inside the ISO.
pub const PRESEED_ISO_PATH: &str = "/preseed.cfg";

const CRYPTED_SUFFIX: &str = "_CRYPTED";

/// Values used when a placeholder has no secret behind it.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("PRESEED_DOMAIN", "home.arpa"),
    ("PRESEED_LOCALE", "en_US.UTF-8"),
    ("PRESEED_KEYMAP", "us"),
    ("PRESEED_MIRROR", "deb.debian.org"),
    ("PRESEED_TIMEZONE", "UTC"),
];

/// Question types understood by debconf.
const QUESTION_TYPES: &[&str] = &[
    "string", "boolean", "select", "multiselect", "note", "text", "password", "title", "error",
];

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").expect("valid placeholder regex"))
}

/// Names of all placeholders in a template, sorted and deduplicated.
pub fn placeholders(template: &str) -> BTreeSet<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitute placeholders.
///
/// `lookup` resolves plain keys; `hash` turns a plain password into a crypt
/// string. Fails listing every placeholder that could not be resolved.
pub fn render<L, H>(template: &str, lookup: L, hash: H) -> Result<String>
where
    L: Fn(&str) -> Option<String>,
    H: Fn(&str) -> Result<String>,
{
    let mut resolved = std::collections::BTreeMap::new();
    let mut missing = Vec::new();

    for name in placeholders(template) {
        let value = match lookup(&name) {
            Some(v) => Some(v),
            None => match name.strip_suffix(CRYPTED_SUFFIX) {
                Some(plain_key) => match lookup(plain_key) {
                    Some(plain) => Some(
                        hash(&plain).with_context(|| format!("Failed to hash {}", plain_key))?,
                    ),
                    None => None,
                },
                None => None,
            },
        };
        match value {
            Some(v) => {
                resolved.insert(name, v);
            }
            None => missing.push(name),
        }
    }

    if !missing.is_empty() {
        bail!(
            "Preseed template references undefined value(s): {}",
            missing.join(", ")
        );
    }

    Ok(placeholder_re()
        .replace_all(template, |c: &Captures| resolved[&c[1]].clone())
        .into_owned())
}

/// Render a template from secrets, falling back to [`DEFAULTS`].
pub fn render_from_secrets(template: &str, secrets: &Secrets) -> Result<String> {
    render(
        template,
        |key| {
            secrets.get(key).or_else(|| {
                DEFAULTS
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            })
        },
        crypt_password,
    )
}

/// SHA-512 crypt of a password via `openssl passwd -6`.
///
/// The password goes through stdin so it never shows up in the process list.
pub fn crypt_password(plain: &str) -> Result<String> {
    let result = Cmd::new("openssl")
        .args(["passwd", "-6", "-stdin"])
        .stdin(format!("{}\n", plain))
        .error_msg("openssl passwd failed")
        .run()?;
    let hash = result.stdout_trimmed();
    if !hash.starts_with("$6$") {
        bail!("openssl passwd returned an unexpected hash format");
    }
    Ok(hash.to_string())
}

/// Check the debconf line structure of a preseed file.
///
/// Returns one message per problem; an empty vector means the file is usable.
pub fn validate(text: &str) -> Vec<String> {
    let mut problems = Vec::new();

    for (line_no, line) in logical_lines(text) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() < 3 {
            problems.push(format!(
                "line {}: expected '<owner> <question> <type> [value]', got '{}'",
                line_no, trimmed
            ));
            continue;
        }

        let qtype = fields[2];
        if !QUESTION_TYPES.contains(&qtype) {
            problems.push(format!(
                "line {}: unknown question type '{}' for {}",
                line_no, qtype, fields[1]
            ));
            continue;
        }

        if qtype == "boolean" {
            let value = fields.get(3).copied().unwrap_or("");
            if value != "true" && value != "false" {
                problems.push(format!(
                    "line {}: boolean {} must be true or false, got '{}'",
                    line_no, fields[1], value
                ));
            }
        }
    }

    if placeholders(text).iter().next().is_some() {
        problems.push("unrendered ${...} placeholders remain".to_string());
    }

    problems
}

/// Join backslash-continued lines, keeping the number of the first line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (i, raw) in text.lines().enumerate() {
        let (start, mut buf) = current.take().unwrap_or((i + 1, String::new()));
        match raw.trim_end().strip_suffix('\\') {
            Some(head) => {
                buf.push_str(head);
                buf.push(' ');
                current = Some((start, buf));
            }
            None => {
                buf.push_str(raw);
                out.push((start, buf));
            }
        }
    }
    if let Some(pending) = current {
        out.push(pending);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn fake_hash(plain: &str) -> Result<String> {
        Ok(format!("$6$salt${}", plain.len()))
    }

    #[test]
    fn test_render_substitutes_and_derives_crypted() {
        let template = "d-i netcfg/get_hostname string ${PRESEED_HOSTNAME}\n\
                        d-i passwd/user-password-crypted password ${PRESEED_PASSWORD_CRYPTED}\n";
        let out = render(
            template,
            lookup_from(&[("PRESEED_HOSTNAME", "media"), ("PRESEED_PASSWORD", "hunter22")]),
            fake_hash,
        )
        .unwrap();

        assert!(out.contains("get_hostname string media\n"));
        assert!(out.contains("password $6$salt$8\n"));
        assert!(!out.contains("hunter22"));
    }

    #[test]
    fn test_explicit_crypted_value_wins() {
        let out = render(
            "x ${PRESEED_PASSWORD_CRYPTED}",
            lookup_from(&[
                ("PRESEED_PASSWORD_CRYPTED", "$6$given"),
                ("PRESEED_PASSWORD", "ignored"),
            ]),
            |_| panic!("must not hash when a crypted value is given"),
        )
        .unwrap();
        assert_eq!(out, "x $6$given");
    }

    #[test]
    fn test_render_reports_all_missing() {
        let err = render(
            "${PRESEED_HOSTNAME} ${PRESEED_USERNAME} ${PRESEED_PASSWORD_CRYPTED}",
            lookup_from(&[]),
            fake_hash,
        )
        .unwrap_err()
        .to_string();
        assert!(err.contains("PRESEED_HOSTNAME"));
        assert!(err.contains("PRESEED_USERNAME"));
        assert!(err.contains("PRESEED_PASSWORD_CRYPTED"));
    }

    #[test]
    fn test_shell_variables_are_left_alone() {
        let out = render("echo $HOME ${lower} $(date)", lookup_from(&[]), fake_hash).unwrap();
        assert_eq!(out, "echo $HOME ${lower} $(date)");
    }

    #[test]
    fn test_bundled_template_renders_and_validates() {
        let out = render(
            BUNDLED_TEMPLATE,
            |k| {
                lookup_from(&[
                    ("PRESEED_HOSTNAME", "media"),
                    ("PRESEED_USERNAME", "admin"),
                    ("PRESEED_PASSWORD", "pw"),
                ])(k)
                .or_else(|| DEFAULTS.iter().find(|(d, _)| *d == k).map(|(_, v)| v.to_string()))
            },
            fake_hash,
        )
        .unwrap();
        let problems = validate(&out);
        assert!(problems.is_empty(), "problems: {:?}", problems);
        assert!(out.contains("in-target usermod -aG sudo admin"));
    }

    #[test]
    fn test_validate_flags_bad_lines() {
        let text = "d-i netcfg/get_hostname\n\
                    d-i partman/confirm boolean yes\n\
                    d-i foo/bar strng value\n\
                    # d-i commented out\n";
        let problems = validate(text);
        assert_eq!(problems.len(), 3, "{:?}", problems);
        assert!(problems[0].starts_with("line 1:"));
        assert!(problems[1].contains("must be true or false"));
        assert!(problems[2].contains("unknown question type 'strng'"));
    }

    #[test]
    fn test_validate_joins_continuations() {
        let text = "d-i preseed/late_command string \\\n    in-target true\n\
                    d-i partman/confirm boolean true\n";
        assert!(validate(text).is_empty());
        let lines = logical_lines(text);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].0, 3);
    }

    #[test]
    fn test_validate_rejects_unrendered_template() {
        let problems = validate("d-i netcfg/get_hostname string ${PRESEED_HOSTNAME}\n");
        assert!(problems.iter().any(|p| p.contains("unrendered")));
    }
}
