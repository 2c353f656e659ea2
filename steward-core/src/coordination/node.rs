/// Separator between the client prefix and the sequence suffix of a contender node name.
pub const LOCK_MARKER: &str = "lock-";

/// Name of the `seq`-th ephemeral sequential node created by `client_id`,
/// e.g. `_c_a1b2-lock-0000000042`.
pub fn node_name(client_id: &str, seq: u64) -> String {
    format!("_c_{}-{}{:010}", client_id, LOCK_MARKER, seq)
}

/// Sequence number encoded in a node name, parsed as an integer.
///
/// Only the digits after the last `lock-` count, so `x-lock-10` sorts after
/// `x-lock-9` regardless of zero padding. Returns `None` for foreign names.
pub fn parse_sequence(name: &str) -> Option<u64> {
    let idx = name.rfind(LOCK_MARKER)?;
    let digits = &name[idx + LOCK_MARKER.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Join path segments with `/`, collapsing duplicated separators.
pub fn join_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        let trimmed = part.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        path.push('/');
        path.push_str(trimmed);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}
