use std::path::Path;

pub fn format_time(value: f64) -> String {
    format!("{value:.6}")
}

/// Path quoted for use as a filter option value (`file='...'`).
///
/// Values inside `-filter_complex` are unquoted twice, once by the graph
/// parser and once by the filter's option parser, so an apostrophe needs
/// an escape that survives both passes.
pub fn escape_ffmpeg_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "'\\\\\\''")
        .replace(':', "\\:")
}

/// Round to the nearest even integer, as chroma subsampling requires.
pub fn even(value: f64) -> u32 {
    let rounded = (value / 2.0).round() * 2.0;
    rounded.max(0.0) as u32
}

/// Smallest even integer not below `value` (ignoring float noise).
pub fn even_ceil(value: f64) -> u32 {
    let v = (value - 1e-6).ceil().max(0.0) as u32;
    v + (v % 2)
}

/// Largest even integer not above `value` (ignoring float noise).
pub fn even_floor(value: f64) -> u32 {
    let v = (value + 1e-6).floor().max(0.0) as u32;
    v - (v % 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_rounding_helpers() {
        assert_eq!(even(3.0), 4);
        assert_eq!(even(2.9), 2);
        assert_eq!(even_ceil(1079.2), 1080);
        assert_eq!(even_ceil(1081.0), 1082);
        assert_eq!(even_floor(1081.9), 1080);
    }

    /// One tokenizer pass: backslash escapes the next char, quotes toggle
    /// a literal span and are dropped.
    fn unquote(value: &str) -> String {
        let mut out = String::new();
        let mut chars = value.chars();
        let mut quoted = false;
        while let Some(c) = chars.next() {
            match c {
                '\'' => quoted = !quoted,
                '\\' if !quoted => out.extend(chars.next()),
                _ => out.push(c),
            }
        }
        out
    }

    #[test]
    fn escapes_filter_paths() {
        assert_eq!(
            escape_ffmpeg_path(Path::new("C:/looks/it's.cube")),
            "C\\:/looks/it'\\\\\\''s.cube"
        );
    }

    #[test]
    fn quoted_paths_survive_both_filter_graph_passes() {
        for raw in ["/fonts/Bob's Sans.ttf", "C:/looks/teal & orange.cube", "/a\\b/it's:here.cube"] {
            let quoted = format!("'{}'", escape_ffmpeg_path(Path::new(raw)));
            assert_eq!(unquote(&unquote(&quoted)), raw, "quoted as {quoted}");
        }
    }
}
