use varia_ir::request::GRAPHIC_URL_PARAM;
use varia_ir::DataRow;

/// Column named by a query value: `{{title}}` names `title`, anything else
/// names itself.
pub fn placeholder_name(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(value)
}

/// Fill a render URL template from one row.
///
/// For each query pair `(key, placeholder)` the value becomes the row's
/// `placeholder` column if present, else its `key` column, else stays as is.
/// `graphicUrl` and values under `images/` are never rewritten.
pub fn build_row_url(template: &url::Url, row: &DataRow) -> url::Url {
    let mut url = template.clone();
    if url.query().is_none() {
        return url;
    }

    let pairs: Vec<(String, String)> = template
        .query_pairs()
        .map(|(key, value)| {
            let exempt = key == GRAPHIC_URL_PARAM || value.starts_with("images/");
            let replacement = if exempt {
                None
            } else {
                row.get(placeholder_name(&value)).or_else(|| row.get(&*key))
            };
            let value = replacement.cloned().unwrap_or_else(|| value.into_owned());
            (key.into_owned(), value)
        })
        .collect();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> DataRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn query(url: &url::Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_placeholder_names() {
        assert_eq!(placeholder_name("{{title}}"), "title");
        assert_eq!(placeholder_name(" {{ title }} "), "title");
        assert_eq!(placeholder_name("title"), "title");
        assert_eq!(placeholder_name("{{open"), "{{open");
    }

    #[test]
    fn test_placeholder_then_key_then_unchanged() {
        let template =
            url::Url::parse("http://localhost/generate?text=title&name=x&color=%7B%7Bc%7D%7D&keep=k").unwrap();
        let r = row(&[("title", "Hi"), ("name", "Ann"), ("c", "#f00")]);
        let out = build_row_url(&template, &r);
        assert_eq!(
            query(&out),
            vec![
                ("text".to_string(), "Hi".to_string()),
                ("name".to_string(), "Ann".to_string()),
                ("color".to_string(), "#f00".to_string()),
                ("keep".to_string(), "k".to_string()),
            ]
        );
        assert_eq!(out.path(), "/generate");
    }

    #[test]
    fn test_exemptions() {
        let template = url::Url::parse(
            "http://localhost/generate?graphicUrl=title&logo=images/logo.svg",
        )
        .unwrap();
        let r = row(&[
            ("title", "nope"),
            ("graphicUrl", "nope"),
            ("images/logo.svg", "nope"),
            ("logo", "nope"),
        ]);
        let out = build_row_url(&template, &r);
        assert_eq!(
            query(&out),
            vec![
                ("graphicUrl".to_string(), "title".to_string()),
                ("logo".to_string(), "images/logo.svg".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_query_untouched() {
        let template = url::Url::parse("http://localhost/generate").unwrap();
        let out = build_row_url(&template, &row(&[("a", "b")]));
        assert_eq!(out.as_str(), "http://localhost/generate");
    }

    #[test]
    fn test_values_are_encoded() {
        let template = url::Url::parse("http://localhost/generate?text=title").unwrap();
        let out = build_row_url(&template, &row(&[("title", "a & b")]));
        assert_eq!(out.query(), Some("text=a+%26+b"));
    }
}
