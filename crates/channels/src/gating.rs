/// Check if a sender is allowed to talk to the assistant through a channel.
///
/// An empty allowlist means everyone is allowed (open policy).
/// Entries are matched case-insensitively against the sender ID.
/// Supports exact match and glob-style `*` wildcards.
///
/// Senders like `"12345|alice"` (numeric id and username joined by `|`) are
/// allowed if any of their parts matches.
pub fn is_allowed(sender_id: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let sender_lower = sender_id.to_lowercase();
    let candidates = std::iter::once(sender_lower.as_str())
        .chain(sender_lower.split('|').filter(|p| !p.is_empty()));
    candidates.into_iter().any(|candidate| {
        allowlist.iter().any(|pattern| {
            let pat = pattern.to_lowercase();
            if pat.contains('*') {
                glob_match(&pat, candidate)
            } else {
                pat == candidate
            }
        })
    })
}

/// `*` matches any run of characters, including none.
fn glob_match(pattern: &str, text: &str) -> bool {
    let Some((head, rest)) = pattern.split_once('*') else {
        return pattern == text;
    };
    let (middle, tail) = rest.rsplit_once('*').unwrap_or(("", rest));

    if text.len() < head.len() + tail.len() || !text.starts_with(head) || !text.ends_with(tail) {
        return false;
    }
    let mut remaining = &text[head.len()..text.len() - tail.len()];
    for segment in middle.split('*').filter(|s| !s.is_empty()) {
        match remaining.find(segment) {
            Some(at) => remaining = &remaining[at + segment.len()..],
            None => return false,
        }
    }
    true
}
