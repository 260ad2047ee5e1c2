//! Shell-style name patterns.
//!
//! Supported syntax:
//! - `*` matches any run of characters except `/`
//! - `?` matches any single character except `/`
//! - `[...]` matches a character class; ranges (`a-z`) are allowed and a
//!   leading `^` or `!` negates the class
//! - `\` escapes the next character

use crate::error::HarnessError;

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnySeq,
    Class {
        negated: bool,
        ranges: Vec<(char, char)>,
    },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => c != SEPARATOR,
            Token::AnySeq => c != SEPARATOR,
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                hit != *negated
            }
        }
    }
}

/// A compiled name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compile a pattern, rejecting malformed escapes and classes.
    pub fn new(raw: &str) -> Result<Self, HarnessError> {
        let bad = |reason| HarnessError::BadPattern {
            pattern: raw.to_string(),
            reason,
        };

        let mut tokens = Vec::new();
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::AnySeq) {
                        tokens.push(Token::AnySeq);
                    }
                }
                '?' => tokens.push(Token::AnyChar),
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| bad("trailing escape"))?;
                    tokens.push(Token::Literal(escaped));
                }
                '[' => {
                    let negated = matches!(chars.peek(), Some('^') | Some('!'));
                    if negated {
                        chars.next();
                    }

                    let mut ranges = Vec::new();
                    loop {
                        let lo = match chars.next() {
                            None => return Err(bad("unterminated character class")),
                            Some(']') if !ranges.is_empty() => break,
                            Some(']') | Some('-') => return Err(bad("empty range in class")),
                            Some('\\') => chars.next().ok_or_else(|| bad("trailing escape"))?,
                            Some(c) => c,
                        };

                        let hi = if chars.peek() == Some(&'-') {
                            chars.next();
                            match chars.next() {
                                None => return Err(bad("unterminated character class")),
                                Some(']') | Some('-') => return Err(bad("open range in class")),
                                Some('\\') => {
                                    chars.next().ok_or_else(|| bad("trailing escape"))?
                                }
                                Some(c) => c,
                            }
                        } else {
                            lo
                        };

                        if hi < lo {
                            return Err(bad("inverted range in class"));
                        }
                        ranges.push((lo, hi));
                    }

                    tokens.push(Token::Class { negated, ranges });
                }
                c => tokens.push(Token::Literal(c)),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern has no wildcards, i.e. it can only
    /// ever match one exact name.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// Test a name against the pattern. The whole name must match.
    pub fn matches(&self, name: &str) -> bool {
        let text: Vec<char> = name.chars().collect();
        let p = &self.tokens;

        // dp[i][j]: the first i tokens match the first j chars
        let mut dp = vec![vec![false; text.len() + 1]; p.len() + 1];
        dp[0][0] = true;

        for i in 1..=p.len() {
            if p[i - 1] == Token::AnySeq {
                dp[i][0] = dp[i - 1][0];
            }
        }

        for i in 1..=p.len() {
            for j in 1..=text.len() {
                dp[i][j] = match &p[i - 1] {
                    Token::AnySeq => {
                        dp[i - 1][j] || (dp[i][j - 1] && p[i - 1].matches(text[j - 1]))
                    }
                    token => dp[i - 1][j - 1] && token.matches(text[j - 1]),
                };
            }
        }

        dp[p.len()][text.len()]
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Pattern {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("*", "anything", true)]
    #[case("*", "", true)]
    #[case("base.*", "base.filesystem.suid", true)]
    #[case("base.*", "other.filesystem", false)]
    #[case("*.suid", "base.filesystem.suid", true)]
    #[case("a.?", "a.b", true)]
    #[case("a.?", "a.bc", false)]
    #[case("a.[bc]", "a.c", true)]
    #[case("a.[^bc]", "a.c", false)]
    #[case("a.[!bc]", "a.d", true)]
    #[case("a.[a-c]x", "a.bx", true)]
    #[case("a.[a-c]x", "a.dx", false)]
    #[case("a\\*", "a*", true)]
    #[case("a\\*", "ab", false)]
    #[case("x.y.z", "x.y.z", true)]
    #[case("x.y.z", "x.y.zz", false)]
    fn test_matches(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
        let pattern = Pattern::new(pattern).unwrap();
        assert_eq!(pattern.matches(name), expected);
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let pattern = Pattern::new("a/*").unwrap();
        assert!(pattern.matches("a/b"));
        assert!(!pattern.matches("a/b/c"));
    }

    #[rstest]
    #[case("[")]
    #[case("[]")]
    #[case("[a-]")]
    #[case("[z-a]")]
    #[case("abc\\")]
    fn test_bad_patterns(#[case] pattern: &str) {
        let err = Pattern::new(pattern).unwrap_err();
        assert!(matches!(err, HarnessError::BadPattern { .. }));
    }

    #[test]
    fn test_is_literal() {
        assert!(Pattern::new("a.b.c").unwrap().is_literal());
        assert!(Pattern::new("a\\*").unwrap().is_literal());
        assert!(!Pattern::new("a.*").unwrap().is_literal());
        assert!(!Pattern::new("a.[bc]").unwrap().is_literal());
    }
}
