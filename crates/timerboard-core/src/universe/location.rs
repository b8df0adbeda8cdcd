/// Canonical lookup key for a location name.
///
/// Names are compared case-insensitively. Surrounding whitespace is dropped
/// and the `»`/`«` separators that appear in in-game structure pastes are
/// treated as `-`.
pub fn canonical_location(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '»' | '«' => '-',
            other => other,
        })
        .collect::<String>()
        .to_uppercase()
}
