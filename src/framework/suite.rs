//! Test suite contract, outcomes, and reports

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use super::driver::TestDriver;
use super::pattern::TestPattern;
use super::size::SizeRange;
use super::FrameworkOptions;

/// Static suite description
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuiteInfo {
    /// Suite name, e.g. `auth`
    pub name: String,
    /// Patterns the suite runs with
    pub test_patterns: Vec<TestPattern>,
    /// Volume sizes the suite needs
    pub supported_size_range: SizeRange,
}

/// How one test ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum TestOutcome {
    /// Every expectation held
    Passed,
    /// Not applicable to this driver/pattern
    Skipped(String),
    /// An expectation or cleanup failed
    Failed(String),
}

impl TestOutcome {
    /// Whether the outcome counts as a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => f.write_str("PASS"),
            TestOutcome::Skipped(reason) => write!(f, "SKIP ({reason})"),
            TestOutcome::Failed(reason) => write!(f, "FAIL ({reason})"),
        }
    }
}

/// Result of one test under one pattern
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Pattern name
    pub pattern: String,
    /// How it ended
    #[serde(flatten)]
    pub outcome: TestOutcome,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u128,
}

impl TestResult {
    /// Build a result, timing from `started`
    pub fn new(name: &str, pattern: &TestPattern, outcome: TestOutcome, started: Instant) -> Self {
        Self::with_duration(name, pattern, outcome, started.elapsed())
    }

    /// Build a result with an explicit duration
    pub fn with_duration(
        name: &str,
        pattern: &TestPattern,
        outcome: TestOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.name.to_string(),
            outcome,
            duration_ms: duration.as_millis(),
        }
    }
}

/// Results of running one suite against one driver
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    /// Suite name
    pub suite: String,
    /// Driver name
    pub driver: String,
    /// One entry per test and pattern
    pub results: Vec<TestResult>,
}

impl SuiteReport {
    /// Number of passed tests
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Passed))
    }

    /// Number of skipped tests
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Skipped(_)))
    }

    /// Number of failed tests
    pub fn failed(&self) -> usize {
        self.count(TestOutcome::is_failure)
    }

    /// No test failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&TestOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// A storage test suite.
#[async_trait]
pub trait TestSuite: Send + Sync {
    /// Suite description
    fn info(&self) -> &TestSuiteInfo;

    /// Names of the tests the suite defines
    fn test_names(&self) -> Vec<&'static str>;

    /// Reason to skip the whole suite for this driver/pattern, if any
    fn skip_unsupported_tests(&self, driver: &dyn TestDriver, pattern: &TestPattern)
        -> Option<String>;

    /// Run the tests whose name contains `focus` (all when `None`)
    async fn define_tests(
        &self,
        driver: &dyn TestDriver,
        pattern: &TestPattern,
        options: &FrameworkOptions,
        focus: Option<&str>,
    ) -> Vec<TestResult>;
}

/// Run every pattern of `suite` against `driver`, in order.
pub async fn run_suite(
    suite: &dyn TestSuite,
    driver: &dyn TestDriver,
    options: &FrameworkOptions,
    focus: Option<&str>,
) -> SuiteReport {
    let info = suite.info();
    let driver_name = driver.driver_info().name.clone();
    let mut results = Vec::new();

    for pattern in &info.test_patterns {
        if let Some(reason) = suite.skip_unsupported_tests(driver, pattern) {
            warn!(suite = %info.name, pattern = %pattern, reason = %reason, "Skipping pattern");
            for name in suite.test_names() {
                if focus.map_or(true, |f| name.contains(f)) {
                    results.push(TestResult::with_duration(
                        name,
                        pattern,
                        TestOutcome::Skipped(reason.clone()),
                        Duration::ZERO,
                    ));
                }
            }
            continue;
        }

        info!(suite = %info.name, pattern = %pattern, driver = %driver_name, "Running pattern");
        results.extend(suite.define_tests(driver, pattern, options, focus).await);
    }

    for r in &results {
        match &r.outcome {
            TestOutcome::Failed(reason) => error!(test = %r.name, reason = %reason, "FAIL"),
            outcome => info!(test = %r.name, outcome = %outcome, "Done"),
        }
    }

    SuiteReport {
        suite: info.name.clone(),
        driver: driver_name,
        results,
    }
}
