//! Common utilities shared across modules.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{CodeSearchError, CodeSearchResult};

/// Race `future` against `token`; cancellation wins ties.
///
/// The future is dropped on cancellation, which cancels whatever backend
/// call it was awaiting.
pub async fn run_cancellable<F, T>(token: &CancellationToken, future: F) -> CodeSearchResult<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CodeSearchError::Cancelled),
        value = future => Ok(value),
    }
}

/// Fail fast when the token is already cancelled.
pub fn ensure_active(token: &CancellationToken) -> CodeSearchResult<()> {
    if token.is_cancelled() {
        Err(CodeSearchError::Cancelled)
    } else {
        Ok(())
    }
}

/// Lowercase words of an identifier: `getUserById`, `get_user_by_id` and
/// `get-user-by-id` all give `["get", "user", "by", "id"]`. Acronym runs stay
/// together (`HTTPServer` -> `["httpserver"]`).
pub fn split_words(identifier: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in identifier.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

const TEST_DIRS: &[&str] = &["tests/", "test/", "__tests__/", "spec/"];
const TEST_MARKERS: &[&str] = &["_test.", ".test.", ".spec.", "_spec."];
const TEST_SUFFIXES: &[&str] = &["Test.java", "Tests.java", "Test.cs", "Tests.cs", "Test.kt"];

/// Build/test-only source file, judged by path.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let with_root = format!("/{normalized}");

    if TEST_DIRS.iter().any(|dir| with_root.contains(&format!("/{dir}"))) {
        return true;
    }

    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    TEST_MARKERS.iter().any(|marker| file_name.contains(marker))
        || TEST_SUFFIXES.iter().any(|suffix| file_name.ends_with(suffix))
        || (file_name.starts_with("test_") && file_name.ends_with(".py"))
}

/// Project a file belongs to: the directory holding it, minus common source roots.
///
/// `App.Api/Controllers/UserController.cs` -> `App.Api`,
/// `src/users/service.ts` -> `users`.
pub fn infer_project(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "src" && *s != "lib")
        .collect();

    match segments.len() {
        0 | 1 => "root".to_string(),
        _ => segments[0].to_string(),
    }
}
