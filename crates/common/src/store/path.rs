//! Path helpers shared by the node store and the topic mapper
//!
//! Paths are `/`-separated UTF-8 strings rooted at `/`. Every helper accepts
//! sloppy input (missing leading slash, trailing slash, surrounding
//! whitespace) and works on the normalized form.

/// Normalize a path to a consistent format: leading slash, no trailing slash
pub fn normalize(path: &str) -> String {
    let path = path.trim();

    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }

    normalized
}

/// Split a path into its non-empty segments
///
/// The root (and the empty string) yields no segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a directory path and a child name
pub fn join(dir: &str, name: &str) -> String {
    let dir = normalize(dir);
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("foo"), "/foo");
        assert_eq!(normalize("/foo"), "/foo");
        assert_eq!(normalize("/foo/"), "/foo");
        assert_eq!(normalize("/foo//"), "/foo");
        assert_eq!(normalize("/foo/bar"), "/foo/bar");
    }

    #[test]
    fn test_segments() {
        assert!(segments("/").is_empty());
        assert!(segments("").is_empty());
        assert_eq!(segments("/a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(segments("a//b/"), vec!["a", "b"]);
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(join("/a/", "b"), "/a/b");
    }
}
