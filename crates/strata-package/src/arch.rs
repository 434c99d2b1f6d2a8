//! Architecture tags and matching.
//!
//! Architectures are dot-hierarchical strings such as `os`, `web.browser`,
//! or `os.linux.x86_64`. A more specific tag can run anything built for one
//! of its prefixes.

/// True if a host of architecture `host` can run something built for
/// architecture `program`.
///
/// `program` describes a set of environments that must be a (non-strict)
/// superset of `host`, so `web.browser` matches `web`, but `os` does not
/// match `osx`.
pub fn arch_matches(host: &str, program: &str) -> bool {
    if !host.starts_with(program) {
        return false;
    }
    host.len() == program.len() || host.as_bytes()[program.len()] == b'.'
}

/// Picks the most specific member of `candidates` that `host` matches, or
/// `None` if none match.
///
/// # Panics
///
/// Panics if `candidates` contains an exact duplicate; offering the same
/// architecture twice is a bug in the caller.
pub fn most_specific_match<'a, I>(host: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    let mut best: Option<&'a str> = None;

    for candidate in candidates {
        assert!(
            !seen.contains(&candidate),
            "duplicate architecture: {candidate}"
        );
        seen.push(candidate);

        if arch_matches(host, candidate) && best.map_or(true, |b| candidate.len() > b.len()) {
            best = Some(candidate);
        }
    }

    best
}
