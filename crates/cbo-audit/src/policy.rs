use crate::{AuditConfig, AuditError};
use cbo_core::claim_contracts::{ProvenancePolicy, QueryMode, TraceCompleteness};

/// Standard queries, or a brain without versioned/audited claims, are never enforced.
pub fn resolve_policy(config: &AuditConfig, mode: QueryMode) -> ProvenancePolicy {
    if mode == QueryMode::Standard || !config.claim_versioning || !config.query_audit_enabled {
        return ProvenancePolicy::Off;
    }
    config.provenance
}

/// Returns the warnings to attach to the run, or the strict-mode violation.
pub fn enforce(
    policy: ProvenancePolicy,
    completeness: &TraceCompleteness,
) -> Result<Vec<String>, AuditError> {
    let total = completeness.total_statements;
    let unlinked = total.saturating_sub(completeness.linked_statements);
    if unlinked == 0 {
        return Ok(Vec::new());
    }
    match policy {
        ProvenancePolicy::Off => Ok(Vec::new()),
        ProvenancePolicy::Warn => Ok(vec![format!(
            "provenance: {unlinked} of {total} statements lack a linked claim"
        )]),
        ProvenancePolicy::Strict => Err(AuditError::ProvenanceViolation { unlinked, total }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completeness(total: usize, linked: usize) -> TraceCompleteness {
        TraceCompleteness {
            total_statements: total,
            linked_statements: linked,
            completeness_ratio: 0.0,
        }
    }

    #[test]
    fn policy_is_off_unless_audited_and_enabled() {
        let strict = AuditConfig {
            provenance: ProvenancePolicy::Strict,
            ..AuditConfig::default()
        };
        assert_eq!(resolve_policy(&strict, QueryMode::Audit), ProvenancePolicy::Strict);
        assert_eq!(resolve_policy(&strict, QueryMode::Standard), ProvenancePolicy::Off);

        let unversioned = AuditConfig {
            claim_versioning: false,
            ..strict.clone()
        };
        assert_eq!(resolve_policy(&unversioned, QueryMode::Audit), ProvenancePolicy::Off);

        let no_audit = AuditConfig {
            query_audit_enabled: false,
            ..strict
        };
        assert_eq!(resolve_policy(&no_audit, QueryMode::Audit), ProvenancePolicy::Off);
    }

    #[test]
    fn strict_fails_warn_records_off_ignores() {
        let gap = completeness(3, 1);
        let err = enforce(ProvenancePolicy::Strict, &gap).expect_err("strict gap");
        assert!(matches!(
            err,
            AuditError::ProvenanceViolation {
                unlinked: 2,
                total: 3
            }
        ));
        assert_eq!(err.kind(), "provenance_violation");

        let warnings = enforce(ProvenancePolicy::Warn, &gap).expect("warn");
        assert_eq!(
            warnings,
            vec!["provenance: 2 of 3 statements lack a linked claim".to_string()]
        );
        assert!(enforce(ProvenancePolicy::Off, &gap).expect("off").is_empty());
        assert!(enforce(ProvenancePolicy::Strict, &completeness(0, 0))
            .expect("empty answer")
            .is_empty());
    }
}
