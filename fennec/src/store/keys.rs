//! Well-known key prefixes.

/// Desired query: `d/<clientID>/<hash>`.
pub fn desired_key(client_id: &str, hash: &str) -> String {
    format!("d/{}/{}", client_id, hash)
}

pub fn desired_prefix(client_id: &str) -> String {
    format!("d/{}/", client_id)
}

/// Got query: `g/<hash>`. Presence is the signal; the value is ignored.
pub fn got_key(hash: &str) -> String {
    format!("g/{}", hash)
}

pub fn got_prefix() -> &'static str {
    "g/"
}

/// Server-written mutation result: `m/<clientID>/<mutationID>`.
pub fn mutation_key(client_id: &str, mutation_id: u64) -> String {
    format!("m/{}/{}", client_id, mutation_id)
}

pub fn mutation_prefix(client_id: &str) -> String {
    format!("m/{}/", client_id)
}

/// The hash at the end of a `d/` or `g/` key.
pub fn hash_of_key(key: &str) -> Option<&str> {
    key.rsplit('/').next()
}

/// Client ID and mutation ID from an `m/` key.
pub fn parse_mutation_key(key: &str) -> Option<(&str, u64)> {
    let rest = key.strip_prefix("m/")?;
    let (client_id, mid) = rest.rsplit_once('/')?;
    Some((client_id, mid.parse().ok()?))
}
