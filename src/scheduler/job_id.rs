//! Job id validation and namespace dispatch.
//!
//! Producers mint ids as `{prefix}{epoch millis}-{random}`; the prefix selects
//! the namespace (queue) the job lives in. Plain UUIDs belong to the project
//! generator queue.

use std::sync::OnceLock;

use regex::Regex;

/// Namespace for jobs identified by a bare UUID.
pub const PROJECT_GENERATOR_NAMESPACE: &str = "project_generator";

/// Namespace served when none is configured.
pub const USER_STORY_NAMESPACE: &str = "user_story_generator";

/// Prefix to namespace dispatch table.
pub const JOB_PREFIXES: &[(&str, &str)] = &[
    ("usgen-", "user_story_generator"),
    ("summ-", "summarizer"),
    ("bcgen-", "bounded_context"),
    ("cmrext-", "command_readmodel_extractor"),
    ("smapgen-", "sitemap_generator"),
    ("reqmap-", "requirements_mapper"),
    ("aggr-draft-", "aggregate_draft_generator"),
    ("preview-fields-", "preview_fields_generator"),
    ("ddl-fields-", "ddl_fields_generator"),
    ("trace-add-", "traceability_generator"),
    ("std-trans-", "standard_transformer"),
    ("ddl-extract-", "ddl_extractor"),
    ("req-valid-", "requirements_validator"),
];

const UUID_PATTERN: &str =
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

/// Suffix every prefixed id must carry: a 13+ digit timestamp and a token.
const PREFIXED_SUFFIX_PATTERN: &str = r"^\d{13,}-[a-z0-9]+$";

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(UUID_PATTERN).expect("valid uuid pattern"))
}

fn suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PREFIXED_SUFFIX_PATTERN).expect("valid suffix pattern"))
}

/// Resolves the namespace a job id belongs to.
///
/// Returns `None` for ids that match no known format; such jobs are never
/// scheduled.
pub fn namespace_for(job_id: &str) -> Option<&'static str> {
    if let Some((prefix, namespace)) = JOB_PREFIXES
        .iter()
        .find(|(prefix, _)| job_id.starts_with(prefix))
    {
        let suffix = &job_id[prefix.len()..];
        return suffix_regex().is_match(suffix).then_some(*namespace);
    }

    if job_id.len() == 36 && uuid_regex().is_match(job_id) {
        return Some(PROJECT_GENERATOR_NAMESPACE);
    }

    None
}

/// Whether `job_id` has a known format.
pub fn is_valid_job_id(job_id: &str) -> bool {
    namespace_for(job_id).is_some()
}

/// Whether `namespace` is served by any known id format.
pub fn is_known_namespace(namespace: &str) -> bool {
    namespace == PROJECT_GENERATOR_NAMESPACE
        || JOB_PREFIXES.iter().any(|(_, ns)| *ns == namespace)
}

/// All namespaces, in dispatch-table order followed by the UUID namespace.
pub fn known_namespaces() -> impl Iterator<Item = &'static str> {
    JOB_PREFIXES
        .iter()
        .map(|(_, ns)| *ns)
        .chain(std::iter::once(PROJECT_GENERATOR_NAMESPACE))
}
