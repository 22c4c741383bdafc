use std::fmt;

/// Identifies a published stream across the whole server: `"{app}/{name}"`.
///
/// Publish and play names may carry a query string (`key?token=abc&quality=high`).  It is split
/// off the name and kept as ordered arguments so it never becomes part of the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPath {
    path: String,
    name: String,
    arguments: Vec<(String, String)>,
}

impl StreamPath {
    pub fn parse(app_name: &str, requested_name: &str) -> StreamPath {
        let (name, query) = match requested_name.split_once('?') {
            Some((name, query)) => (name, query),
            None => (requested_name, ""),
        };

        let arguments = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        StreamPath {
            path: format!("{}/{}", app_name, name),
            name: name.to_string(),
            arguments,
        }
    }

    /// The full `app/name` key used by the registry
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Stream name without the app or query string
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[(String, String)] {
        &self.arguments
    }

    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for StreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_has_no_arguments() {
        let path = StreamPath::parse("live", "camera1");

        assert_eq!(path.as_str(), "live/camera1");
        assert_eq!(path.name(), "camera1");
        assert!(path.arguments().is_empty());
    }

    #[test]
    fn query_string_is_split_into_ordered_arguments() {
        let path = StreamPath::parse("live", "camera1?token=abc&flag&quality=high");

        assert_eq!(path.as_str(), "live/camera1");
        assert_eq!(
            path.arguments(),
            &[
                ("token".to_string(), "abc".to_string()),
                ("flag".to_string(), String::new()),
                ("quality".to_string(), "high".to_string()),
            ]
        );
        assert_eq!(path.argument("token"), Some("abc"));
        assert_eq!(path.argument("missing"), None);
    }

    #[test]
    fn same_name_with_different_queries_share_a_path() {
        let first = StreamPath::parse("live", "cam?token=1");
        let second = StreamPath::parse("live", "cam?token=2");

        assert_eq!(first.as_str(), second.as_str());
    }
}
