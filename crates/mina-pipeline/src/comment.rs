//! Free-text annotation parsing.
//!
//! A comment containing `=` is read as comma-separated `key=value`
//! pairs, each becoming its own column. Only the first `=` of a pair
//! separates key from value. Any other text lands in a single `Comment`
//! column.

/// Column used for annotation text that is not a `key=value` pair.
pub const COMMENT_COLUMN: &str = "Comment";

/// Split a user comment into `(column, value)` pairs.
///
/// - `""` gives no pairs. Whitespace is text like any other.
/// - Text without `=` gives one `Comment` pair holding the text verbatim.
/// - Otherwise every comma-separated fragment with a non-empty key
///   before its first `=` gives a pair, key and value kept verbatim.
///   Remaining non-empty fragments are joined with `,` under `Comment`,
///   after the pairs.
#[must_use]
pub fn parse_comment(text: &str) -> Vec<(String, String)> {
    if text.is_empty() {
        return Vec::new();
    }
    if !text.contains('=') {
        return vec![(COMMENT_COLUMN.to_owned(), text.to_owned())];
    }

    let mut pairs = Vec::new();
    let mut loose = Vec::new();
    for fragment in text.split(',').filter(|f| !f.is_empty()) {
        match fragment.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                pairs.push((key.to_owned(), value.to_owned()));
            }
            _ => loose.push(fragment),
        }
    }
    if !loose.is_empty() {
        pairs.push((COMMENT_COLUMN.to_owned(), loose.join(",")));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn key_value_pairs_become_columns() {
        assert_eq!(
            parse_comment("batch=3,cond=ctrl"),
            pairs(&[("batch", "3"), ("cond", "ctrl")])
        );
    }

    #[test]
    fn plain_text_goes_to_comment() {
        assert_eq!(parse_comment("note"), pairs(&[("Comment", "note")]));
    }

    #[test]
    fn plain_text_is_kept_verbatim() {
        assert_eq!(
            parse_comment(" dish 6, r4 "),
            pairs(&[("Comment", " dish 6, r4 ")])
        );
    }

    #[test]
    fn empty_comment_adds_nothing() {
        assert!(parse_comment("").is_empty());
    }

    #[test]
    fn whitespace_comment_is_kept() {
        assert_eq!(parse_comment("   "), pairs(&[("Comment", "   ")]));
    }

    #[test]
    fn only_first_equals_splits() {
        assert_eq!(parse_comment("expr=a=b"), pairs(&[("expr", "a=b")]));
    }

    #[test]
    fn values_are_kept_verbatim() {
        assert_eq!(
            parse_comment("batch= 3 ,cond=ctrl"),
            pairs(&[("batch", " 3 "), ("cond", "ctrl")])
        );
    }

    #[test]
    fn loose_fragments_are_collected() {
        assert_eq!(
            parse_comment("batch=3,redo,=x"),
            pairs(&[("batch", "3"), ("Comment", "redo,=x")])
        );
    }
}
