/// Remote path normalization: leading/trailing slashes are stripped, an
/// empty result collapses to `/` (the bucket root).
pub fn norm_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_surrounding_slashes() {
        assert_eq!(norm_path("/docs/a.txt/"), "docs/a.txt");
        assert_eq!(norm_path("docs"), "docs");
    }

    #[test]
    fn empty_paths_collapse_to_root() {
        assert_eq!(norm_path(""), "/");
        assert_eq!(norm_path("/"), "/");
        assert_eq!(norm_path("///"), "/");
    }
}
