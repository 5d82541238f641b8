use crate::utils::encrypt::md5;

/// Sub-instance key for a run keyword. An empty keyword maps to an empty key
/// so the default instance of a spider keeps plain collection names.
pub fn make_hash(keyin: &str) -> String {
    if keyin.is_empty() {
        return String::new();
    }
    md5(keyin.as_bytes())
}

/// Name of the history collection for one spider instance.
///
/// `success` selects the `y` (succeeded) set, otherwise the `n` (failed) set.
pub fn history_collection(success: bool, spider: &str, sub: &str) -> String {
    let flag = if success { "y" } else { "n" };
    if sub.is_empty() {
        format!("history__{flag}__{spider}")
    } else {
        format!("history__{flag}__{spider}__{sub}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_hash() {
        assert_eq!(make_hash(""), "");
        assert_eq!(make_hash("hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(make_hash("rust"), make_hash("rust"));
    }

    #[test]
    fn test_history_collection() {
        assert_eq!(history_collection(true, "news", ""), "history__y__news");
        assert_eq!(history_collection(false, "news", "abc"), "history__n__news__abc");
    }
}
