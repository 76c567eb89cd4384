//! Public download URL construction and parsing.
//!
//! [`build_url`] and [`id_from_url`] are exact inverses for any non-zero id and
//! any serve URL prefix, relative (`/v0/file/s/`) or absolute
//! (`https://cdn.example.com/files/`).

use stowage_core::Uid;

/// Build the public URL for `id` under `serve_url`, with an optional extension.
pub fn build_url(serve_url: &str, id: Uid, ext: Option<&str>) -> String {
    let base = serve_url.trim_end_matches('/');
    match ext.map(|e| e.trim_start_matches('.')).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}/{}.{}", base, id, ext),
        None => format!("{}/{}", base, id),
    }
}

/// Extract the file id from a URL built by [`build_url`].
///
/// A bare file name is accepted. Any other directory must match `serve_url`
/// after path cleaning; otherwise [`Uid::ZERO`] is returned.
pub fn id_from_url(url: &str, serve_url: &str) -> Uid {
    let url = url.split(['?', '#']).next().unwrap_or_default();
    let (origin, path) = split_origin(url);
    let (serve_origin, serve_path) = split_origin(serve_url);

    if !origin.is_empty() && !origin.eq_ignore_ascii_case(serve_origin) {
        return Uid::ZERO;
    }

    let cleaned = clean_path(path);
    let (dir, file) = match cleaned.rfind('/') {
        Some(idx) => cleaned.split_at(idx + 1),
        None => ("", cleaned.as_str()),
    };

    if !dir.is_empty() {
        let mut expected = clean_path(serve_path);
        if !expected.ends_with('/') {
            expected.push('/');
        }
        if dir != expected {
            return Uid::ZERO;
        }
    }

    Uid::parse(file.split('.').next().unwrap_or_default())
}

/// Split `scheme://authority` off the front of a URL.
fn split_origin(url: &str) -> (&str, &str) {
    match url.find("://") {
        Some(scheme_end) => {
            let after = scheme_end + 3;
            match url[after..].find('/') {
                Some(slash) => url.split_at(after + slash),
                None => (url, "/"),
            }
        }
        None => ("", url),
    }
}

/// Lexical path cleaning: collapses repeated slashes and resolves `.` and `..`.
fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}
