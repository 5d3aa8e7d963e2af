use std::path::Path;

use url::Url;

use crate::error::AppError;

/// Query parameter carrying the portal's property identifier.
pub const PROPERTY_ID_PARAM: &str = "prop_id";

/// Parse the external property identifier from a detail-page URL.
///
/// Example: `"…/Property.aspx?cid=56&prop_id=12345"` → `12345`
pub fn property_id_from_url(url: &str) -> Result<i64, AppError> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| AppError::MalformedInput(format!("invalid URL '{url}': {e}")))?;

    let raw = parsed
        .query_pairs()
        .find(|(key, _)| key.eq_ignore_ascii_case(PROPERTY_ID_PARAM))
        .map(|(_, value)| value.trim().to_string())
        .ok_or_else(|| {
            AppError::MalformedInput(format!("no {PROPERTY_ID_PARAM} provided in url '{url}'"))
        })?;

    raw.parse::<i64>().map_err(|_| {
        AppError::MalformedInput(format!(
            "{PROPERTY_ID_PARAM} '{raw}' in url '{url}' is not a number"
        ))
    })
}

/// Non-empty, trimmed lines of a newline-delimited text.
pub fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read a newline-delimited input file (URLs, user agents, proxies).
pub fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(non_empty_lines(&text))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_property_id_from_url() {
        assert_eq!(
            property_id_from_url(
                "https://propaccess.trueautomation.com/clientdb/Property.aspx?cid=56&prop_id=2290"
            )
            .unwrap(),
            2290
        );
        assert_eq!(
            property_id_from_url("https://example.com/p?prop_id=7&cid=56").unwrap(),
            7
        );
    }

    #[test]
    fn test_missing_property_id_is_malformed() {
        let err =
            property_id_from_url("https://propaccess.trueautomation.com/clientdb/?cid=56")
                .unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(_)));
        assert!(err.to_string().contains("no prop_id"));
    }

    #[test]
    fn test_non_numeric_property_id_is_malformed() {
        for url in [
            "https://example.com/?prop_id=",
            "https://example.com/?prop_id=abc",
            "not a url",
        ] {
            assert!(
                matches!(property_id_from_url(url), Err(AppError::MalformedInput(_))),
                "{url} should be malformed"
            );
        }
    }

    #[test]
    fn test_read_lines_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "https://example.com/?prop_id=1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  https://example.com/?prop_id=2  ").unwrap();
        writeln!(file, "   ").unwrap();

        let lines = read_lines(file.path()).unwrap();
        assert_eq!(
            lines,
            vec![
                "https://example.com/?prop_id=1".to_string(),
                "https://example.com/?prop_id=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_read_lines_missing_file() {
        assert!(read_lines(Path::new("/definitely/not/here.txt")).is_err());
    }
}
