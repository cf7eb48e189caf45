use crate::{
    config::VerifierConfig,
    error::{RecordError, RecordResult},
    operation::{MappingDependence, OperationGraph, OperationKind},
    state::TraceState,
    types::OpId,
};
use core::fmt;
use derive_more::Display;
use tracing::{error, info, instrument, warn};

mod data_flow;
mod races;

/// How bad a finding is.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// A required ordering was not enforced, or a race is possible.
    #[display("ERROR")]
    Error,
    /// An enforced ordering was unnecessary.
    #[display("WARNING")]
    Warning,
}

/// Which check produced a finding.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Check {
    /// Claimed against required logical dependences.
    #[display("logical dependence")]
    LogicalDependence,
    /// Data flow along true dependences.
    #[display("data flow")]
    DataFlow,
    /// Ordering of conflicting instance accesses.
    #[display("instance race")]
    InstanceRace,
}

/// One diagnostic.
///
/// The alternate form (`{:#}`) appends the details, one indented line each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Severity.
    pub severity: Severity,
    /// Producing check.
    pub check: Check,
    /// One-line description.
    pub message: String,
    /// Requirement descriptions backing the message.
    pub details: Option<String>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(details) = self.details.as_deref().filter(|_| f.alternate()) {
            for line in details.lines() {
                write!(f, "\n    {line}")?;
            }
        }
        Ok(())
    }
}

/// Every finding of one check.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    check: Check,
    findings: Vec<Finding>,
}

impl Report {
    fn new(check: Check) -> Self {
        Self {
            check,
            findings: Vec::new(),
        }
    }

    fn push(&mut self, severity: Severity, message: String, details: Option<String>) {
        match severity {
            Severity::Error => error!(check = %self.check, "{message}"),
            Severity::Warning => warn!(check = %self.check, "{message}"),
        }
        self.findings.push(Finding {
            severity,
            check: self.check,
            message,
            details,
        });
    }

    /// Check that produced the report.
    #[must_use]
    pub const fn check(&self) -> Check {
        self.check
    }

    /// Findings in discovery order.
    #[must_use]
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// Number of errors.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Number of warnings.
    #[must_use]
    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Whether nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// `data flow: 1 errors, 0 warnings`, followed by every finding.
impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} errors, {} warnings",
            self.check,
            self.errors(),
            self.warnings()
        )?;
        for finding in &self.findings {
            if f.alternate() {
                write!(f, "\n{finding:#}")?;
            } else {
                write!(f, "\n{finding}")?;
            }
        }
        Ok(())
    }
}

/// Batch checks over a fully ingested trace.
///
/// The logical check rewrites the required dependences kept in the state,
/// so the verifier borrows the state mutably for its whole life.
#[derive(Debug)]
pub struct Verifier<'s> {
    state: &'s mut TraceState,
    config: VerifierConfig,
}

impl<'s> Verifier<'s> {
    /// Build a verifier over `state`.
    ///
    /// # Errors
    /// [`RecordError::Halted`] if ingestion stopped on a fatal record: a
    /// partially ingested trace is never analyzed.
    pub fn new(state: &'s mut TraceState, config: VerifierConfig) -> RecordResult<Self> {
        if state.is_halted() {
            return Err(RecordError::Halted);
        }
        Ok(Self { state, config })
    }

    /// Configuration in use.
    pub const fn config(&self) -> VerifierConfig {
        self.config
    }

    /// Compare, for every task, the dependences the runtime claimed between
    /// its children with the ones their requirements imply.
    ///
    /// A required dependence not covered by a chain of claimed ones is an
    /// error; a claimed dependence that is not required is a warning.
    #[instrument(skip(self), fields(fence_policy = ?self.config.fence_policy()))]
    pub fn check_logical(&mut self) -> Report {
        let state = &mut *self.state;
        state
            .ops
            .compute_all_required(&state.regions, self.config.fence_policy());
        let ops = &state.ops;
        let mut report = Report::new(Check::LogicalDependence);
        for context in ops.contexts() {
            let diff = ops.dependence_diff(context);
            for dep in &diff.missing {
                report.push(
                    Severity::Error,
                    format!("missing dependence between {}", pair(ops, dep)),
                    Some(dependence_details(ops, dep)),
                );
            }
            for dep in &diff.unnecessary {
                report.push(
                    Severity::Warning,
                    format!("unnecessary dependence between {}", pair(ops, dep)),
                    self.config
                        .verbose()
                        .then(|| dependence_details(ops, dep)),
                );
            }
        }
        info!(
            errors = report.errors(),
            warnings = report.warnings(),
            "logical dependence check finished"
        );
        report
    }

    /// Follow every claimed true dependence through the event graph and
    /// confirm the consumer's data can come from the producer's instance,
    /// directly or through copies.
    #[instrument(skip(self))]
    pub fn check_data_flow(&self) -> Report {
        let mut report = Report::new(Check::DataFlow);
        data_flow::check(self.state, self.config, &mut report);
        info!(errors = report.errors(), "data flow check finished");
        report
    }

    /// Confirm that every two conflicting accesses to the same instance
    /// field are ordered by the event graph, in one direction or the other.
    #[instrument(skip(self))]
    pub fn check_instance_dependences(&self) -> Report {
        let mut report = Report::new(Check::InstanceRace);
        races::check(self.state, self.config, &mut report);
        info!(errors = report.errors(), "instance race check finished");
        report
    }

    /// Run the three checks in order.
    pub fn check_all(&mut self) -> [Report; 3] {
        [
            self.check_logical(),
            self.check_data_flow(),
            self.check_instance_dependences(),
        ]
    }
}

fn describe(ops: &OperationGraph, op: OpId) -> String {
    ops.get(op)
        .map_or_else(|| format!("operation {op}"), ToString::to_string)
}

fn pair(ops: &OperationGraph, dep: &MappingDependence) -> String {
    format!(
        "requirement {} of {} and requirement {} of {}",
        dep.producer_req,
        describe(ops, dep.producer),
        dep.consumer_req,
        describe(ops, dep.consumer)
    )
}

fn requirement_details(ops: &OperationGraph, op: OpId, index: u32) -> String {
    match ops.get(op).map(|o| (o.kind(), o.requirement(index))) {
        Some((OperationKind::Fence, _)) => "fence operation".to_owned(),
        Some((_, Some(req))) => req.to_string(),
        _ => format!("requirement {index} of operation {op} not recorded"),
    }
}

fn dependence_details(ops: &OperationGraph, dep: &MappingDependence) -> String {
    format!(
        "First Requirement:\n{}\nSecond Requirement:\n{}",
        requirement_details(ops, dep.producer, dep.producer_req),
        requirement_details(ops, dep.consumer, dep.consumer_req)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halted_state_is_refused() {
        let mut state = TraceState::new();
        state.add_memory(crate::types::MemId(1), 0).unwrap();
        assert!(state.add_memory(crate::types::MemId(1), 0).is_err());
        assert_eq!(
            Verifier::new(&mut state, VerifierConfig::default()).unwrap_err(),
            RecordError::Halted
        );
    }

    #[test]
    fn findings_render_details_in_alternate_form() {
        let mut report = Report::new(Check::DataFlow);
        report.push(
            Severity::Error,
            "no path".to_owned(),
            Some("a\nb".to_owned()),
        );
        report.push(Severity::Warning, "slow".to_owned(), None);
        assert_eq!((report.errors(), report.warnings()), (1, 1));
        assert_eq!(report.findings()[0].to_string(), "ERROR: no path");
        assert_eq!(format!("{:#}", report.findings()[0]), "ERROR: no path\n    a\n    b");
        assert_eq!(
            report.to_string(),
            "data flow: 1 errors, 1 warnings\nERROR: no path\nWARNING: slow"
        );
    }

    #[test]
    fn empty_trace_is_clean() {
        let mut state = TraceState::new();
        let mut verifier = Verifier::new(&mut state, VerifierConfig::new()).unwrap();
        assert!(verifier.check_all().iter().all(Report::is_clean));
    }
}
