/// Two-letter avatar initials: first letter of the first and last words.
///
/// A single word yields its first letter twice, matching the dashboard's
/// avatar badges.
pub fn initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();

    let (Some(first), Some(last)) = (words.first(), words.last()) else {
        return String::new();
    };

    [first, last]
        .iter()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}
