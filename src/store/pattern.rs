//! Glob matching with the same rules the remote store applies to `SCAN MATCH`.

/// Matches `key` against a glob `pattern`.
///
/// Supports `*` (any run, including empty), `?` (one character), `[abc]`,
/// `[a-z]`, `[^abc]` classes and `\` escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    match_from(&pattern, &key)
}

fn match_from(pattern: &[char], key: &[char]) -> bool {
    let (mut p, mut k) = (0, 0);
    // Position to resume from after the most recent `*`.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, k));
                p += 1;
                continue;
            }
            Some('?') => Some(1),
            Some('[') => match_class(&pattern[p..], key[k]),
            Some('\\') if p + 1 < pattern.len() => (pattern[p + 1] == key[k]).then_some(2),
            Some(&c) => (c == key[k]).then_some(1),
            None => None,
        };

        match step {
            Some(width) => {
                p += width;
                k += 1;
            }
            None => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    k = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Returns the width of the class token when `c` is a member.
fn match_class(pattern: &[char], c: char) -> Option<usize> {
    let mut i = 1;
    let negate = matches!(pattern.get(i), Some('^'));
    if negate {
        i += 1;
    }

    let mut hit = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            hit |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            hit |= lo <= c && c <= hi;
            i += 3;
        } else {
            hit |= pattern[i] == c;
            i += 1;
        }
    }

    if i >= pattern.len() {
        // Unterminated class: treat `[` literally.
        return (c == '[').then_some(1);
    }
    (hit != negate).then_some(i + 1)
}
