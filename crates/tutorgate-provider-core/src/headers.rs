/// Ordered header list; names compare case-insensitively.
pub type Headers = Vec<(String, String)>;

pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
    {
        Some((_, slot)) => *slot = value,
        None => headers.push((name, value)),
    }
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
