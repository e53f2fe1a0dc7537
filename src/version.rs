//! Total order on version-release strings, reproducing the legacy ordering
//! relied on by installer clients.

use std::cmp::Ordering;

/// A single alternating digit/alpha run within a tokenized V or R string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Digits(String),
    Alpha(String),
}

/// Split a version (or release) component into alternating digit/alpha
/// runs, discarding any non-alphanumeric separator characters and
/// stripping leading zeros from digit runs.
fn tokenize(s: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut run = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() {
                    run.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            let trimmed = run.trim_start_matches('0');
            tokens.push(Token::Digits(trimmed.to_string()));
        } else if c.is_alphanumeric() {
            // alphabetic run (alphanumeric but not a leading digit, i.e. letters)
            let mut run = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphabetic() {
                    run.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Alpha(run));
        } else {
            // separator: discarded
            chars.next();
        }
    }

    tokens
}

fn compare_tokens(a: &[Token], b: &[Token]) -> Ordering {
    for (ta, tb) in a.iter().zip(b.iter()) {
        let ord = match (ta, tb) {
            (Token::Digits(x), Token::Digits(y)) => {
                x.len().cmp(&y.len()).then_with(|| x.cmp(y))
            }
            (Token::Alpha(x), Token::Alpha(y)) => x.cmp(y),
            // a non-digit run sorts before a digit run at the same index
            (Token::Alpha(_), Token::Digits(_)) => Ordering::Less,
            (Token::Digits(_), Token::Alpha(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // common prefix exhausted: the longer sequence is greater
    a.len().cmp(&b.len())
}

fn compare_component(a: &str, b: &str) -> Ordering {
    compare_tokens(&tokenize(a), &tokenize(b))
}

/// Split a `V-R` string on its *final* hyphen; R is optional.
fn split_vr(s: &str) -> (&str, &str) {
    match s.rfind('-') {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

/// Compare two version-release strings under the legacy total order:
/// compare V first, then R.
pub fn compare(a: &str, b: &str) -> Ordering {
    let (va, ra) = split_vr(a);
    let (vb, rb) = split_vr(b);
    compare_component(va, vb).then_with(|| compare_component(ra, rb))
}

/// Newtype wrapper giving `Ord`/`PartialOrd` over the raw string so
/// version-release strings can be used directly as sort keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupVersion(pub String);

impl PartialOrd for SetupVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SetupVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) {
        assert_eq!(compare(a, b), Ordering::Less, "{a} should be < {b}");
    }
    fn eq(a: &str, b: &str) {
        assert_eq!(compare(a, b), Ordering::Equal, "{a} should == {b}");
    }

    #[test]
    fn numeric_compares_by_value_not_length() {
        lt("1.0-1", "1.0-2");
        lt("1.9-1", "1.10-1");
        lt("0.9-1", "1.0-1");
    }

    #[test]
    fn leading_zeros_stripped() {
        eq("1.01-1", "1.1-1");
        eq("1.0-01", "1.0-1");
    }

    #[test]
    fn non_digit_sorts_before_digit_at_same_index() {
        lt("1.0a-1", "1.0.1-1");
    }

    #[test]
    fn prefix_implies_shorter_is_less() {
        lt("1.0-1", "1.0.1-1");
        lt("1.0", "1.0.0");
    }

    #[test]
    fn release_compared_after_version() {
        lt("1.0-1", "1.1-1");
        lt("1.0-1", "1.0-2");
    }

    #[test]
    fn no_release_is_like_empty_release() {
        lt("1.0", "1.0-1");
    }

    #[test]
    fn total_order_is_transitive_for_a_sample() {
        let mut versions = vec!["1.0-1", "1.0-2", "0.9-5", "1.10-1", "1.9-1", "2.0-1"];
        versions.sort_by(|a, b| compare(a, b));
        assert_eq!(
            versions,
            vec!["0.9-5", "1.0-1", "1.0-2", "1.9-1", "1.10-1", "2.0-1"]
        );
    }
}
