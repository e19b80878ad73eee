//! Placeholder substitution. Whole-token only — no eval, no
//! templating-engine features, over a fixed enumerated variable set.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::lead::Lead;

fn placeholder_pattern() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").unwrap())
}

/// `Some(value)` for a recognized placeholder (value may itself be empty),
/// `None` if the placeholder name isn't one the renderer knows about.
fn lookup<'a>(lead: &'a Lead, key: &str) -> Option<&'a str> {
    match key {
        "first_name" => Some(lead.first_name.as_deref().unwrap_or("")),
        "company" => Some(lead.company.as_deref().unwrap_or("")),
        _ => None,
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Substitutes `{{first_name}}` / `{{company}}` tokens. Empty values render
/// as the empty string; unknown placeholders are left literal. When
/// `escape` is set, substituted values are HTML-escaped (used for the HTML
/// body; the subject is plain text and left raw).
fn substitute(input: &str, lead: &Lead, escape: bool) -> String {
    placeholder_pattern()
        .replace_all(input, |caps: &regex::Captures| {
            let key = &caps[1];
            match lookup(lead, key) {
                Some(value) if escape => escape_html(value),
                Some(value) => value.to_string(),
                // Unknown placeholder: leave the original `{{...}}` token
                // literal rather than guessing or erroring.
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Renders a template's subject and body for one lead, appending the
/// owning user's signature after a blank paragraph separator.
pub fn render(
    subject_template: &str,
    body_template: &str,
    lead: &Lead,
    signature_html: &str,
) -> (String, String) {
    let subject = substitute(subject_template, lead, false);
    let mut body = substitute(body_template, lead, true);
    body.push_str("\n<p>&nbsp;</p>\n");
    body.push_str(signature_html);
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn lead(first_name: Option<&str>, company: Option<&str>) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            campaign_id: Uuid::new_v4(),
            email: "lead@example.com".into(),
            first_name: first_name.map(String::from),
            company: company.map(String::from),
            status: "pending".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn substitutes_known_placeholders() {
        let l = lead(Some("Ada"), Some("Acme"));
        let (subject, body) = render(
            "Hi {{first_name}}",
            "<p>Hello {{first_name}} from {{company}}</p>",
            &l,
            "<p>Thanks, Team</p>",
        );
        assert_eq!(subject, "Hi Ada");
        assert!(body.contains("Hello Ada from Acme"));
        assert!(body.ends_with("<p>Thanks, Team</p>"));
    }

    #[test]
    fn empty_values_render_as_empty_string() {
        let l = lead(None, None);
        let (subject, _) = render("Hi {{first_name}},", "body", &l, "sig");
        assert_eq!(subject, "Hi ,");
    }

    #[test]
    fn unknown_placeholders_are_left_literal() {
        let l = lead(Some("Ada"), None);
        let (subject, _) = render("Re: {{deal_size}}", "body", &l, "sig");
        assert_eq!(subject, "Re: {{deal_size}}");
    }

    #[test]
    fn whitespace_inside_braces_is_not_tolerated() {
        let l = lead(Some("Ada"), None);
        let (subject, _) = render("Hi {{ first_name }}", "body", &l, "sig");
        assert_eq!(subject, "Hi {{ first_name }}");
    }

    #[test]
    fn html_entities_in_values_are_escaped_in_body_but_not_subject() {
        let l = lead(Some("Bob & Co <script>"), None);
        let (subject, body) = render("{{first_name}}", "{{first_name}}", &l, "sig");
        assert_eq!(subject, "Bob & Co <script>");
        assert!(body.contains("Bob &amp; Co &lt;script&gt;"));
    }
}
