//! Title text preparation for `drawtext`.

/// Capitalize the first letter of every word, lowercasing the rest.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Greedy word wrap; words longer than `width` are broken.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        if word.is_empty() {
            continue;
        }
        let len = current.chars().count();
        if len == 0 {
            current = word;
        } else if len + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Escape text for a single-quoted `drawtext` `text=` value.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\\\\\"),
            '\'' => out.push_str("'\\\\\\''"),
            '%' => out.push_str("\\\\%"),
            ':' => out.push_str("\\:"),
            '"' => out.push_str("\\\""),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            '[' => out.push_str("\\["),
            ']' => out.push_str("\\]"),
            _ => out.push(c),
        }
    }
    out
}

/// Title-cased, wrapped and escaped title.
pub fn prepare_title(name: &str, wrap_at: usize) -> String {
    escape_drawtext(&wrap(&title_case(name), wrap_at).join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_normalizes_words() {
        assert_eq!(title_case("diamond PUSH  ups"), "Diamond Push Ups");
        assert_eq!(title_case("90/90 hip switch"), "90/90 Hip Switch");
    }

    #[test]
    fn wrap_breaks_on_words_and_splits_long_ones() {
        assert_eq!(
            wrap("Single Leg Romanian Deadlift", 12),
            vec!["Single Leg", "Romanian", "Deadlift"]
        );
        assert_eq!(wrap("Supercalifragilistic", 8), vec!["Supercal", "ifragili", "stic"]);
    }

    #[test]
    fn escape_protects_drawtext_syntax() {
        assert_eq!(escape_drawtext("Rest: 50%"), "Rest\\: 50\\\\%");
        assert_eq!(escape_drawtext("Child's Pose"), "Child'\\\\\\''s Pose");
    }
}
