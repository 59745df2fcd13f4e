//! Regression checking of DejaGnu `.sum` files against a reference summary.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::UtilError;

/// Result recorded for one test in a DejaGnu summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Pass,
    Fail,
    XPass,
    XFail,
    KFail,
    KPass,
    Unresolved,
    Unsupported,
    Untested,
}

impl Outcome {
    fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            "XPASS" => Self::XPass,
            "XFAIL" => Self::XFail,
            "KFAIL" => Self::KFail,
            "KPASS" => Self::KPass,
            "UNRESOLVED" => Self::Unresolved,
            "UNSUPPORTED" => Self::Unsupported,
            "UNTESTED" => Self::Untested,
            _ => return None,
        })
    }

    /// Whether the result counts as a pass (expected failures included).
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass | Self::XFail | Self::KFail)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::XPass => "XPASS",
            Self::XFail => "XFAIL",
            Self::KFail => "KFAIL",
            Self::KPass => "KPASS",
            Self::Unresolved => "UNRESOLVED",
            Self::Unsupported => "UNSUPPORTED",
            Self::Untested => "UNTESTED",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed summary: test name to outcome. Later duplicates win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    results: BTreeMap<String, Outcome>,
}

impl Summary {
    /// Parse the text of a `.sum` file. Lines that are not results are ignored.
    pub fn parse(text: &str) -> Self {
        let results = text
            .lines()
            .filter_map(|line| {
                let (tag, name) = line.split_once(": ")?;
                let outcome = Outcome::parse(tag.trim())?;
                Some((name.trim().to_owned(), outcome))
            })
            .collect();
        Self { results }
    }

    /// Read and parse a `.sum` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, UtilError> {
        Ok(Self::parse(&crate::fs::read_to_string(path)?))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, test: &str) -> Option<Outcome> {
        self.results.get(test).copied()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.values().filter(|o| **o == outcome).count()
    }
}

/// A test whose outcome got worse relative to the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regression {
    pub test: String,
    /// `None` when the test is new.
    pub expected: Option<Outcome>,
    /// `None` when the test disappeared.
    pub actual: Option<Outcome>,
}

impl fmt::Display for Regression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |o: Option<Outcome>| o.map_or("missing", Outcome::as_str);
        write!(
            f,
            "{}: {} -> {}",
            self.test,
            show(self.expected),
            show(self.actual)
        )
    }
}

/// Tests that passed in `reference` but no longer do, plus new tests that do not pass.
pub fn compare(reference: &Summary, current: &Summary) -> Vec<Regression> {
    let mut regressions: Vec<Regression> = reference
        .results
        .iter()
        .filter(|(_, expected)| expected.is_pass())
        .filter_map(|(test, expected)| {
            let actual = current.get(test);
            match actual {
                Some(a) if a.is_pass() => None,
                _ => Some(Regression {
                    test: test.clone(),
                    expected: Some(*expected),
                    actual,
                }),
            }
        })
        .collect();

    regressions.extend(
        current
            .results
            .iter()
            .filter(|(test, actual)| !actual.is_pass() && reference.get(test).is_none())
            .map(|(test, actual)| Regression {
                test: test.clone(),
                expected: None,
                actual: Some(*actual),
            }),
    );
    regressions
}
