//! Turns a page snapshot into links and actionables.

use crate::fetcher::{FormSnapshot, PageSnapshot};
use crate::result::{Actionable, ExtractionResult};
use url::Url;

pub fn extract(snapshot: &PageSnapshot) -> ExtractionResult {
    ExtractionResult {
        links: snapshot.links.clone(),
        actionables: collect_actionables(&snapshot.links, &snapshot.forms),
    }
}

/// Query-bearing anchors first, then forms, in page order.
pub fn collect_actionables(links: &[String], forms: &[FormSnapshot]) -> Vec<Actionable> {
    let mut actionables: Vec<Actionable> = links
        .iter()
        .filter(|href| href.contains('?'))
        .map(Actionable::get)
        .collect();

    actionables.extend(forms.iter().map(form_actionable));
    actionables
}

/// Percent-encode one form component. `!'()*` stay literal, as browsers
/// leave them when building form payloads.
pub fn encode_component(raw: &str) -> String {
    urlencoding::encode(raw)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

/// `name=value` pairs, each side percent-encoded, joined with `&`.
pub fn encode_fields(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}={}", encode_component(name), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// GET forms fold their fields into the action's query string; every other
/// method keeps the encoded body separate.
pub fn form_actionable(form: &FormSnapshot) -> Actionable {
    let method = if form.method.is_empty() {
        "get".to_string()
    } else {
        form.method.to_lowercase()
    };
    let encoded = encode_fields(&form.fields);

    if method != "get" {
        return Actionable {
            url: form.action.clone(),
            method,
            data: Some(encoded),
        };
    }

    Actionable::get(append_query(&form.action, &encoded))
}

fn append_query(action: &str, encoded: &str) -> String {
    if encoded.is_empty() {
        return action.to_string();
    }
    let Ok(mut url) = Url::parse(action) else {
        return action.to_string();
    };
    let query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, encoded),
        _ => encoded.to_string(),
    };
    url.set_query(Some(&query));
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(action: &str, method: &str, fields: &[(&str, &str)]) -> FormSnapshot {
        FormSnapshot {
            action: action.to_string(),
            method: method.to_string(),
            fields: fields
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_method_defaults_to_get() {
        let actionable = form_actionable(&form("https://x.test/search", "", &[("q", "rust lang")]));
        assert_eq!(actionable.method, "get");
        assert_eq!(actionable.url, "https://x.test/search?q=rust%20lang");
        assert_eq!(actionable.data, None);
    }

    #[test]
    fn test_get_form_preserves_existing_query() {
        let actionable = form_actionable(&form(
            "https://x.test/search?lang=en",
            "get",
            &[("q", "a&b"), ("page", "1")],
        ));
        assert_eq!(
            actionable.url,
            "https://x.test/search?lang=en&q=a%26b&page=1"
        );
    }

    #[test]
    fn test_get_form_without_fields_keeps_action() {
        let actionable = form_actionable(&form("https://x.test/list?x=1", "GET", &[]));
        assert_eq!(actionable.url, "https://x.test/list?x=1");
    }

    #[test]
    fn test_post_form_keeps_body_separate() {
        let actionable = form_actionable(&form(
            "https://x.test/login?next=/home",
            "POST",
            &[("user", "admin"), ("pass", "p@ss word")],
        ));
        assert_eq!(actionable.method, "post");
        assert_eq!(actionable.url, "https://x.test/login?next=/home");
        assert_eq!(actionable.data.as_deref(), Some("user=admin&pass=p%40ss%20word"));
    }

    #[test]
    fn test_marks_stay_unescaped_in_form_data() {
        assert_eq!(encode_component("it's (ok)!*"), "it's%20(ok)!*");
        assert_eq!(encode_component("100%!"), "100%25!");

        let post = form_actionable(&form("https://x.test/c", "post", &[("msg", "hi (all)!")]));
        assert_eq!(post.data.as_deref(), Some("msg=hi%20(all)!"));

        let get = form_actionable(&form("https://x.test/s", "get", &[("q", "f(x)*2")]));
        assert_eq!(get.url, "https://x.test/s?q=f(x)*2");
    }

    #[test]
    fn test_post_form_without_fields_has_empty_body() {
        let actionable = form_actionable(&form("https://x.test/logout", "post", &[]));
        assert_eq!(actionable.data.as_deref(), Some(""));
    }

    #[test]
    fn test_collect_actionables_orders_links_before_forms() {
        let links = vec![
            "https://x.test/a".to_string(),
            "https://x.test/b?id=1".to_string(),
            "https://other.test/c?x=y".to_string(),
        ];
        let forms = vec![form("https://x.test/login", "post", &[("u", "")])];

        let actionables = collect_actionables(&links, &forms);
        assert_eq!(actionables.len(), 3);
        assert_eq!(actionables[0], Actionable::get("https://x.test/b?id=1"));
        assert_eq!(actionables[1], Actionable::get("https://other.test/c?x=y"));
        assert_eq!(actionables[2].method, "post");
    }

    #[test]
    fn test_serialized_record_uses_type_key() {
        let json = serde_json::to_string(&Actionable::get("https://x.test/?a=1")).unwrap();
        assert_eq!(json, r#"{"url":"https://x.test/?a=1","type":"get"}"#);
    }
}
