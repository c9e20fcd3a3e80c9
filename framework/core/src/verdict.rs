use std::fmt;

/// Overall judgement of a run.
///
/// Variants are ordered by severity so the combined verdict of several checks is their maximum.
/// An indeterminate result is worse than a marginal one because it means the data could not be
/// trusted, but a confirmed failure still outranks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Verdict {
    Pass,
    Marginal,
    Indeterminate,
    Fail,
}

impl Verdict {
    pub fn worst(self, other: Verdict) -> Verdict {
        self.max(other)
    }

    /// Process exit status for this verdict.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Pass => 0,
            Verdict::Fail => 1,
            Verdict::Marginal => 2,
            Verdict::Indeterminate => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Marginal => "MARGINAL",
            Verdict::Indeterminate => "INDETERMINATE",
            Verdict::Fail => "FAIL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
