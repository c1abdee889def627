use std::cmp::Ordering;

/// Natural filename ordering: alternating digit and non-digit runs are
/// compared positionally, digit runs as integers and the rest
/// case-insensitively, so `page2` sorts before `page10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Tokens::new(a);
    let mut right = Tokens::new(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match compare_tokens(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn compare_tokens(a: Token<'_>, b: Token<'_>) -> Ordering {
    match (a, b) {
        (Token::Digits(x), Token::Digits(y)) => compare_digit_runs(x, y),
        (Token::Text(x), Token::Text(y)) => {
            let x = x.chars().flat_map(char::to_lowercase);
            let y = y.chars().flat_map(char::to_lowercase);
            x.cmp(y)
        }
        // Digit runs sort ahead of text so "2.jpg" precedes "cover.jpg".
        (Token::Digits(_), Token::Text(_)) => Ordering::Less,
        (Token::Text(_), Token::Digits(_)) => Ordering::Greater,
    }
}

/// Compare digit runs as integers of arbitrary length: strip leading
/// zeros, then longer means larger, then lexicographic.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

struct Tokens<'a> {
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let first = self.rest.chars().next()?;
        let is_digit_run = first.is_ascii_digit();
        let end = self
            .rest
            .find(|c: char| c.is_ascii_digit() != is_digit_run)
            .unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if is_digit_run {
            Token::Digits(token)
        } else {
            Token::Text(token)
        })
    }
}
