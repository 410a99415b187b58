//! Project validation run in the background when a manifest is served

use std::sync::Arc;

use xdl_core::{LogSink, ProjectConfig};

/// Skip validation entirely when set
pub const SKIP_VALIDATION_ENV: &str = "EXPO_SKIP_MANIFEST_VALIDATION_TOKEN";

/// A problem found in the project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

/// Checks a project config and reports problems
pub trait ProjectValidator: Send + Sync {
    fn validate(&self, config: &ProjectConfig) -> Vec<ValidationIssue>;
}

/// Required fields: `name`, `slug`, `sdkVersion`
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl ProjectValidator for BasicValidator {
    fn validate(&self, config: &ProjectConfig) -> Vec<ValidationIssue> {
        let exp = &config.exp;
        let file = config.source.file_name();
        [
            ("name", exp.name.as_deref()),
            ("slug", exp.slug.as_deref()),
            ("sdkVersion", exp.sdk_version.as_deref()),
        ]
        .into_iter()
        .filter(|(_, value)| value.map_or(true, |v| v.trim().is_empty()))
        .map(|(field, _)| ValidationIssue {
            field,
            message: format!("Missing `{field}` in {file}"),
        })
        .collect()
    }
}

pub fn validation_skipped() -> bool {
    std::env::var_os(SKIP_VALIDATION_ENV).is_some()
}

/// Validate and warn through `sink`; returns the number of issues
pub fn validate_and_report(
    validator: &dyn ProjectValidator,
    config: &ProjectConfig,
    sink: &LogSink,
) -> usize {
    if validation_skipped() {
        return 0;
    }
    let issues = validator.validate(config);
    for issue in &issues {
        sink.warn(issue.message.clone());
    }
    issues.len()
}

pub fn default_validator() -> Arc<dyn ProjectValidator> {
    Arc::new(BasicValidator)
}
