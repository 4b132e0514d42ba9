//! Endpoint parser for turning raw source text into unique candidates

use crate::proxy::models::Endpoint;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Strict `a.b.c.d:port` pattern, 1-3 ASCII digits per group and any number of port digits
static ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}):([0-9]+)$")
        .expect("Invalid endpoint regex")
});

/// Parser for `host:port` candidate lists
pub struct EndpointParser;

impl EndpointParser {
    /// Parse a single line.
    ///
    /// Anything after `#` is a comment. The remainder must match the strict
    /// pattern exactly once trimmed; values such as `999.999.999.999:1` are
    /// accepted since only digit counts are checked.
    pub fn parse_line(line: &str) -> Option<Endpoint> {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            return None;
        }

        let caps = ENDPOINT_REGEX.captures(line)?;
        Some(Endpoint::new(&caps[1], &caps[2]))
    }

    /// Parse every line of a blob, keeping duplicates
    pub fn parse_string(content: &str) -> Vec<Endpoint> {
        content.lines().filter_map(Self::parse_line).collect()
    }

    /// Parse and deduplicate several blobs.
    ///
    /// The first occurrence of an endpoint wins, so the output follows
    /// source order, although callers must not rely on that.
    pub fn normalize<'a, I>(blobs: I) -> Vec<Endpoint>
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::dedup(blobs.into_iter().flat_map(Self::parse_string))
    }

    /// Drop repeated endpoints, keeping the first occurrence
    pub fn dedup<I>(endpoints: I) -> Vec<Endpoint>
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let mut seen = HashSet::new();
        endpoints
            .into_iter()
            .filter(|endpoint| seen.insert(endpoint.clone()))
            .collect()
    }

    /// Parse and deduplicate a local file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Endpoint>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::normalize([content.as_str()]))
    }

    /// Save endpoints to a file, one `host:port` per line
    pub fn save_to_file<P: AsRef<Path>>(endpoints: &[Endpoint], path: P) -> Result<()> {
        let content = endpoints
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_format() {
        let endpoint = EndpointParser::parse_line("192.168.1.1:8080").unwrap();
        assert_eq!(endpoint.host, "192.168.1.1");
        assert_eq!(endpoint.port, "8080");
    }

    #[test]
    fn test_parse_strips_trailing_comment() {
        let endpoint = EndpointParser::parse_line("  1.2.3.4:8080 # dup  ").unwrap();
        assert_eq!(endpoint, Endpoint::new("1.2.3.4", "8080"));
    }

    #[test]
    fn test_parse_comment_line() {
        assert!(EndpointParser::parse_line("# 1.2.3.4:8080").is_none());
    }

    #[test]
    fn test_parse_empty_line() {
        assert!(EndpointParser::parse_line("").is_none());
        assert!(EndpointParser::parse_line("   ").is_none());
    }

    #[test]
    fn test_parse_accepts_out_of_range_values() {
        let endpoint = EndpointParser::parse_line("999.999.999.999:1").unwrap();
        assert_eq!(endpoint.host, "999.999.999.999");

        assert!(EndpointParser::parse_line("1.2.3.4:123456").is_some());
    }

    #[test]
    fn test_parse_invalid_format() {
        assert!(EndpointParser::parse_line("bad-entry").is_none());
        assert!(EndpointParser::parse_line("192.168.1.1").is_none());
        assert!(EndpointParser::parse_line("192.168.1.1:abc").is_none());
        assert!(EndpointParser::parse_line("1234.1.1.1:80").is_none());
        assert!(EndpointParser::parse_line("1.1.1:80").is_none());
        assert!(EndpointParser::parse_line("http://1.1.1.1:80").is_none());
        assert!(EndpointParser::parse_line("1.1.1.1:80:user:pass").is_none());
        assert!(EndpointParser::parse_line("1.1.1.1 :80").is_none());
    }

    #[test]
    fn test_parse_rejects_non_ascii_digits() {
        assert!(EndpointParser::parse_line("١.٢.٣.٤:٨٠").is_none());
        assert!(EndpointParser::parse_line("１.２.３.４:８０").is_none());
        assert!(EndpointParser::parse_line("1.2.3.4:٨٠").is_none());
        let endpoints = EndpointParser::normalize(["١.٢.٣.٤:٨٠\n1.2.3.4:80"]);
        assert_eq!(endpoints, vec![Endpoint::new("1.2.3.4", "80")]);
    }

    #[test]
    fn test_normalize_scenario() {
        let blob = "1.2.3.4:8080\n1.2.3.4:8080 # dup\nbad-entry\n5.6.7.8:3128";
        let endpoints = EndpointParser::normalize([blob]);

        let set: HashSet<String> = endpoints.iter().map(|e| e.to_string()).collect();
        assert_eq!(endpoints.len(), 2);
        assert!(set.contains("1.2.3.4:8080"));
        assert!(set.contains("5.6.7.8:3128"));
    }

    #[test]
    fn test_normalize_dedups_across_blobs() {
        let first = "10.0.0.1:80\n10.0.0.2:80";
        let second = "10.0.0.2:80\n10.0.0.3:80\n10.0.0.1:80";
        let endpoints = EndpointParser::normalize([first, second]);

        let rendered: Vec<String> = endpoints.iter().map(|e| e.to_string()).collect();
        assert_eq!(rendered, vec!["10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80"]);
    }

    #[test]
    fn test_dedup_keeps_first() {
        let endpoints = vec![
            Endpoint::new("1.1.1.1", "80"),
            Endpoint::new("2.2.2.2", "80"),
            Endpoint::new("1.1.1.1", "80"),
            Endpoint::new("1.1.1.1", "81"),
        ];
        let unique = EndpointParser::dedup(endpoints);
        assert_eq!(unique.len(), 3);
        assert_eq!(unique[2], Endpoint::new("1.1.1.1", "81"));
    }

    #[test]
    fn test_normalize_output_is_unique_and_strict() {
        let blob = r#"
# header
1.1.1.1:1
1.1.1.1:1
 2.2.2.2:2
3.3.3.3:3 #comment
junk 4.4.4.4:4
5.5.5:5
"#;
        let endpoints = EndpointParser::normalize([blob]);
        let unique: HashSet<&Endpoint> = endpoints.iter().collect();
        assert_eq!(unique.len(), endpoints.len());
        assert_eq!(endpoints.len(), 3);
        for endpoint in &endpoints {
            assert!(ENDPOINT_REGEX.is_match(&endpoint.to_string()));
        }
    }

    #[test]
    fn test_save_and_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.txt");
        let endpoints = vec![Endpoint::new("1.2.3.4", "80"), Endpoint::new("5.6.7.8", "3128")];

        EndpointParser::save_to_file(&endpoints, &path).unwrap();
        let parsed = EndpointParser::parse_file(&path).unwrap();
        assert_eq!(parsed, endpoints);
    }
}
