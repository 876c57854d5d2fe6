//! Failure classification and reconnect strategy.
//!
//! Every error the harness observes, whether returned by a query or read from
//! the server's diagnostic log, goes through the same ordered rule table. The
//! first matching rule decides the [`FailureKind`]; rules only ever match on
//! exact DB2 message identifiers, SQL codes or log markers.

use std::time::Duration;

use regex::Regex;
use tokio_retry::strategy::ExponentialBackoff;

use super::types::{FailureKind, QueryError};
use crate::config::ConnectionResetPolicy;

/// Creates the exponential backoff used when re-establishing a session.
///
/// - Initial delay: `RECONNECT_INITIAL_DELAY_MS` milliseconds
/// - Backoff factor: `RECONNECT_FACTOR`
/// - Maximum delay: `RECONNECT_MAX_DELAY_SECS` seconds
/// - Maximum attempts: `RECONNECT_MAX_ATTEMPTS`
pub fn get_retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(crate::config::RECONNECT_INITIAL_DELAY_MS)
        .factor(crate::config::RECONNECT_FACTOR)
        .max_delay(Duration::from_secs(crate::config::RECONNECT_MAX_DELAY_SECS))
        .take(crate::config::RECONNECT_MAX_ATTEMPTS)
}

/// Which channel a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSource {
    /// Errors returned by a query call
    Query,
    /// Lines read from the diagnostic log stream
    DiagnosticLog,
    /// Both channels
    Any,
}

impl RuleSource {
    fn covers(self, channel: RuleSource) -> bool {
        self == RuleSource::Any || self == channel
    }
}

/// One signature in the classifier's rule table.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    name: String,
    pattern: Regex,
    kind: FailureKind,
    source: RuleSource,
}

impl ClassifierRule {
    /// Compiles a rule. Fails only when `pattern` is not a valid regex.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        kind: FailureKind,
        source: RuleSource,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            kind,
            source,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    fn matches(&self, channel: RuleSource, text: &str) -> bool {
        self.source.covers(channel) && self.pattern.is_match(text)
    }
}

/// Result of classifying one error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FailureKind,
    /// Name of the rule that matched, `None` when the fallback applied
    pub rule: Option<String>,
}

impl Classification {
    fn fallback(kind: FailureKind) -> Self {
        Self { kind, rule: None }
    }
}

// (name, pattern, kind, source); evaluated top to bottom, first match wins
const TARGET_SIGNATURES: &[(&str, &str, FailureKind, RuleSource)] = &[
    // UDF abnormal termination raised when ST_Transform crashes inside the fenced process
    (
        "udf_abnormal_termination",
        r"SQL0430N|SQLCODE\s*=\s*-430\b",
        FailureKind::TargetFailure,
        RuleSource::Any,
    ),
    // Spatial extender internal error from the projection engine
    (
        "gse_projection_engine_error",
        r#"(?s)GSE3015N.*Reason code\s*=\s*"-2901""#,
        FailureKind::TargetFailure,
        RuleSource::Any,
    ),
    (
        "double_free",
        r"(?i)double free or corruption|free\(\): double free",
        FailureKind::TargetFailure,
        RuleSource::DiagnosticLog,
    ),
    (
        "fodc_trap",
        r"FODC_Trap",
        FailureKind::TargetFailure,
        RuleSource::DiagnosticLog,
    ),
];

const FATAL_SIGNATURES: &[(&str, &str, FailureKind, RuleSource)] = &[
    // Instance terminated, communication failure, manager not started, quiesced
    (
        "instance_unavailable",
        r"SQL1224N|SQL30081N|SQL1032N|SQL1776N|SQLCODE\s*=\s*-(1224|30081|1032|1776)\b",
        FailureKind::Fatal,
        RuleSource::Any,
    ),
    (
        "engine_process_terminated",
        r"(?i)db2sysc.*(terminated|abnormal(ly)? end|killed)",
        FailureKind::Fatal,
        RuleSource::DiagnosticLog,
    ),
];

const CONNECTION_RESET_PATTERN: &str =
    r"(?i)connection reset|broken pipe|connection (was )?closed|communication link failure";

/// Ordered rule table mapping error text to a [`FailureKind`].
///
/// Built-in signatures come first, followed by the connection reset rule whose
/// kind depends on [`ConnectionResetPolicy`], followed by any rules added with
/// [`FailureClassifier::with_rule`]. Query errors that match nothing are
/// `Transient`; log lines that match nothing are ignored.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    rules: Vec<ClassifierRule>,
}

impl FailureClassifier {
    pub fn new(reset_policy: ConnectionResetPolicy) -> Self {
        let reset_kind = match reset_policy {
            ConnectionResetPolicy::Transient => FailureKind::Transient,
            ConnectionResetPolicy::Fatal => FailureKind::Fatal,
        };

        let builtin = TARGET_SIGNATURES
            .iter()
            .chain(FATAL_SIGNATURES.iter())
            .copied()
            .chain(std::iter::once((
                "connection_reset",
                CONNECTION_RESET_PATTERN,
                reset_kind,
                RuleSource::Query,
            )));

        let rules = builtin
            .filter_map(|(name, pattern, kind, source)| {
                match ClassifierRule::new(name, pattern, kind, source) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        log::error!("Built-in classifier rule '{}' failed to compile: {}", name, e);
                        None
                    }
                }
            })
            .collect();

        Self { rules }
    }

    /// Appends a rule, evaluated after all built-in signatures.
    pub fn with_rule(mut self, rule: ClassifierRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    /// Classifies the error returned by one query attempt.
    pub fn classify(&self, error: &QueryError) -> Classification {
        if let QueryError::Timeout(_) = error {
            // A hung call is not evidence of the race on its own
            return Classification {
                kind: FailureKind::Transient,
                rule: Some("query_timeout".to_string()),
            };
        }

        let text = error.classification_text();
        self.first_match(RuleSource::Query, &text)
            .unwrap_or_else(|| Classification::fallback(FailureKind::Transient))
    }

    /// Classifies one line of the diagnostic log stream.
    ///
    /// Returns `None` for lines that carry no known signature.
    pub fn classify_log_line(&self, line: &str) -> Option<Classification> {
        self.first_match(RuleSource::DiagnosticLog, line)
    }

    /// Classifies a query outcome, treating `Ok` as `Success`.
    pub fn classify_result<T>(&self, result: &Result<T, QueryError>) -> Classification {
        match result {
            Ok(_) => Classification::fallback(FailureKind::Success),
            Err(e) => self.classify(e),
        }
    }

    fn first_match(&self, channel: RuleSource, text: &str) -> Option<Classification> {
        self.rules
            .iter()
            .find(|rule| rule.matches(channel, text))
            .map(|rule| Classification {
                kind: rule.kind,
                rule: Some(rule.name.clone()),
            })
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new(ConnectionResetPolicy::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_err(message: &str) -> QueryError {
        QueryError::database(message)
    }

    #[test]
    fn test_all_builtin_rules_compile() {
        let classifier = FailureClassifier::default();
        assert_eq!(
            classifier.rules().len(),
            TARGET_SIGNATURES.len() + FATAL_SIGNATURES.len() + 1
        );
    }

    #[test]
    fn test_udf_abnormal_termination_is_target_failure() {
        let classifier = FailureClassifier::default();
        let err = db_err(
            "[IBM][CLI Driver][DB2/LINUXX8664] SQL0430N  User defined function \
             \"DB2GSE.ST_TRANSFORM\" (specific name \"STTRANSFORM\") has abnormally terminated.  \
             SQLSTATE=38503 SQLCODE=-430",
        );
        let c = classifier.classify(&err);
        assert_eq!(c.kind, FailureKind::TargetFailure);
        assert_eq!(c.rule.as_deref(), Some("udf_abnormal_termination"));
    }

    #[test]
    fn test_native_code_alone_is_enough() {
        let classifier = FailureClassifier::default();
        let err = QueryError::Database {
            sqlstate: Some("38503".to_string()),
            native_code: Some(-430),
            message: "routine abended".to_string(),
        };
        assert_eq!(classifier.classify(&err).kind, FailureKind::TargetFailure);
    }

    #[test]
    fn test_gse_reason_code_is_target_failure() {
        let classifier = FailureClassifier::default();
        let err = db_err(
            "SQL0443N  Routine \"DB2GSE.GSEGEOMFROMWKT\" has returned an error SQLSTATE with \
             diagnostic text \"GSE3015N  Reason code = \"-2901\". \"  SQLSTATE=38SUC",
        );
        let c = classifier.classify(&err);
        assert_eq!(c.kind, FailureKind::TargetFailure);
        assert_eq!(c.rule.as_deref(), Some("gse_projection_engine_error"));
    }

    #[test]
    fn test_other_gse_reason_code_is_not_target() {
        let classifier = FailureClassifier::default();
        let err = db_err("GSE3015N  Reason code = \"-2902\".");
        assert_eq!(classifier.classify(&err).kind, FailureKind::Transient);
    }

    #[test]
    fn test_sqlcode_prefix_does_not_overmatch() {
        let classifier = FailureClassifier::default();
        // -4302 must not be mistaken for -430
        let err = db_err("Java exception SQLCODE=-4302");
        assert_eq!(classifier.classify(&err).kind, FailureKind::Transient);
    }

    #[test]
    fn test_instance_down_is_fatal() {
        let classifier = FailureClassifier::default();
        for message in [
            "SQL1224N  The database manager is not able to accept new requests. SQLSTATE=55032",
            "SQL30081N  A communication error has been detected. Communication protocol being used: \"TCP/IP\".",
            "SQL1032N  No start database manager command was issued.  SQLSTATE=57019",
        ] {
            let c = classifier.classify(&db_err(message));
            assert_eq!(c.kind, FailureKind::Fatal, "{message}");
            assert_eq!(c.rule.as_deref(), Some("instance_unavailable"));
        }
    }

    #[test]
    fn test_connection_reset_follows_policy() {
        let err = db_err("read tcp 127.0.0.1:50000: connection reset by peer");

        let transient = FailureClassifier::new(ConnectionResetPolicy::Transient);
        let c = transient.classify(&err);
        assert_eq!(c.kind, FailureKind::Transient);
        assert_eq!(c.rule.as_deref(), Some("connection_reset"));

        let fatal = FailureClassifier::new(ConnectionResetPolicy::Fatal);
        assert_eq!(fatal.classify(&err).kind, FailureKind::Fatal);
    }

    #[test]
    fn test_timeout_is_transient() {
        let classifier = FailureClassifier::default();
        let c = classifier.classify(&QueryError::Timeout(Duration::from_secs(30)));
        assert_eq!(c.kind, FailureKind::Transient);
        assert_eq!(c.rule.as_deref(), Some("query_timeout"));
    }

    #[test]
    fn test_unmatched_error_falls_back_to_transient() {
        let classifier = FailureClassifier::default();
        let c = classifier.classify(&db_err("SQL0911N  The current transaction has been rolled back"));
        assert_eq!(c, Classification::fallback(FailureKind::Transient));
    }

    #[test]
    fn test_classify_result_success() {
        let classifier = FailureClassifier::default();
        let ok: Result<Option<String>, QueryError> = Ok(Some("POINT (-98.7 29.5)".to_string()));
        assert_eq!(classifier.classify_result(&ok).kind, FailureKind::Success);
    }

    #[test]
    fn test_log_lines() {
        let classifier = FailureClassifier::default();
        assert_eq!(
            classifier
                .classify_log_line("*** Error in `db2fmp': double free or corruption (fasttop): 0x00007f")
                .map(|c| c.kind),
            Some(FailureKind::TargetFailure)
        );
        assert_eq!(
            classifier
                .classify_log_line("FODC_Trap_2024-05-01-10.11.12.000000_1234_5678_000 created")
                .map(|c| c.kind),
            Some(FailureKind::TargetFailure)
        );
        assert_eq!(
            classifier
                .classify_log_line("ADM7513W  Database manager has started.")
                .map(|c| c.kind),
            None
        );
    }

    #[test]
    fn test_query_only_rule_ignored_for_log_lines() {
        let classifier = FailureClassifier::default();
        assert!(classifier
            .classify_log_line("client connection reset by peer")
            .is_none());
    }

    #[test]
    fn test_custom_rule_appended() {
        let rule = ClassifierRule::new(
            "lock_timeout",
            r#"SQL0911N.*"68""#,
            FailureKind::Fatal,
            RuleSource::Query,
        )
        .expect("valid pattern");
        let classifier = FailureClassifier::default().with_rule(rule);
        let c = classifier.classify(&db_err("SQL0911N  rolled back because of lock timeout. Reason code \"68\"."));
        assert_eq!(c.kind, FailureKind::Fatal);
        assert_eq!(c.rule.as_deref(), Some("lock_timeout"));
    }

    #[test]
    fn test_invalid_custom_rule_rejected() {
        assert!(ClassifierRule::new("bad", "(", FailureKind::Fatal, RuleSource::Any).is_err());
    }

    #[test]
    fn test_get_retry_strategy_is_bounded() {
        let delays: Vec<Duration> = get_retry_strategy().collect();
        assert_eq!(delays.len(), crate::config::RECONNECT_MAX_ATTEMPTS);
        for delay in delays {
            assert!(delay <= Duration::from_secs(crate::config::RECONNECT_MAX_DELAY_SECS));
        }
    }
}
