//! Content hashing for issue deduplication and change detection.
//!
//! SHA-256 over substantive fields in a fixed order, with a NUL separator
//! after every field (absent fields contribute an empty value plus the
//! separator). The separator makes field boundaries explicit: description
//! "A" with no notes never hashes like no description with notes "A".

use sha2::{Digest, Sha256};

use crate::model::{DependencyType, IssueType, Priority, Status};

/// Compute the content hash from raw issue components.
///
/// Fields included, in order: title, description, design,
/// `acceptance_criteria`, notes, status, priority, `issue_type`, assignee,
/// owner, labels (sorted, comma-joined), dependency set (sorted
/// `target:type` pairs, comma-joined).
///
/// Excluded: id and `content_hash` (circular), `external_ref` (identity
/// signal, not content — external-ref matching is its own collision phase),
/// all timestamps, close reason, events.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn content_hash_from_parts(
    title: &str,
    description: Option<&str>,
    design: Option<&str>,
    acceptance_criteria: Option<&str>,
    notes: Option<&str>,
    status: Status,
    priority: Priority,
    issue_type: IssueType,
    assignee: Option<&str>,
    owner: Option<&str>,
    labels: &[String],
    dependencies: &[(String, DependencyType)],
) -> String {
    let mut hasher = Sha256::new();

    let mut add_field = |value: &str| {
        if value.contains('\0') {
            hasher.update(value.replace('\0', " ").as_bytes());
        } else {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\x00");
    };

    add_field(title);
    add_field(description.unwrap_or(""));
    add_field(design.unwrap_or(""));
    add_field(acceptance_criteria.unwrap_or(""));
    add_field(notes.unwrap_or(""));
    add_field(status.as_str());
    add_field(&format!("P{}", priority.0));
    add_field(issue_type.as_str());
    add_field(assignee.unwrap_or(""));
    add_field(owner.unwrap_or(""));

    let mut sorted_labels: Vec<&str> = labels.iter().map(String::as_str).collect();
    sorted_labels.sort_unstable();
    add_field(&sorted_labels.join(","));

    let mut sorted_deps: Vec<String> = dependencies
        .iter()
        .map(|(target, dep_type)| format!("{target}:{}", dep_type.as_str()))
        .collect();
    sorted_deps.sort_unstable();
    add_field(&sorted_deps.join(","));

    format!("{:x}", hasher.finalize())
}
