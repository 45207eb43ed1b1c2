use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}").expect("variable pattern is valid"))
}

/// Values visible to `${NAME}` placeholders during one attempt
pub struct VarScope<'a> {
    vars: &'a BTreeMap<String, String>,
    base_url: &'a str,
    attempt: u32,
}

impl<'a> VarScope<'a> {
    pub fn new(vars: &'a BTreeMap<String, String>, base_url: &'a str, attempt: u32) -> Self {
        Self {
            vars,
            base_url,
            attempt,
        }
    }

    /// Scenario vars first, then built-ins, then the process environment
    pub fn get_var(&self, name: &str) -> Option<String> {
        if let Some(value) = self.vars.get(name) {
            return Some(value.clone());
        }
        match name {
            "BASE_URL" => Some(self.base_url.to_string()),
            "ATTEMPT" => Some(self.attempt.to_string()),
            "time" => Some(chrono::Local::now().format("%H:%M:%S").to_string()),
            "date" => Some(chrono::Local::now().format("%Y-%m-%d").to_string()),
            "timestamp" => Some(chrono::Utc::now().timestamp().to_string()),
            _ => std::env::var(name).ok(),
        }
    }

    /// Substitute `${name}` patterns; unknown names are left as written
    pub fn substitute(&self, text: &str) -> String {
        if !text.contains("${") {
            return text.to_string();
        }
        var_pattern()
            .replace_all(text, |caps: &regex::Captures| {
                let key = &caps[1];
                self.get_var(key).unwrap_or_else(|| format!("${{{}}}", key))
            })
            .to_string()
    }

    /// Resolve a possibly relative URL against the service base URL
    pub fn resolve_url(&self, url: &str) -> String {
        let url = self.substitute(url);
        if url.starts_with("http://") || url.starts_with("https://") {
            return url;
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_vars() {
        let mut vars = BTreeMap::new();
        vars.insert("ISBN".to_string(), "9789999999999".to_string());
        let scope = VarScope::new(&vars, "http://127.0.0.1:5001", 2);

        assert_eq!(scope.substitute("isbn=${ISBN}"), "isbn=9789999999999");
        assert_eq!(scope.substitute("${BASE_URL}/catalog"), "http://127.0.0.1:5001/catalog");
        assert_eq!(scope.substitute("try ${ATTEMPT}"), "try 2");
        assert_eq!(
            scope.substitute("${E2E_SURELY_UNSET_VARIABLE}"),
            "${E2E_SURELY_UNSET_VARIABLE}"
        );
    }

    #[test]
    fn test_resolve_url() {
        let vars = BTreeMap::new();
        let scope = VarScope::new(&vars, "http://localhost:5000/", 1);
        assert_eq!(scope.resolve_url("/add_book"), "http://localhost:5000/add_book");
        assert_eq!(scope.resolve_url("catalog"), "http://localhost:5000/catalog");
        assert_eq!(
            scope.resolve_url("https://example.com/x"),
            "https://example.com/x"
        );
    }
}
