use serde::{Deserialize, Serialize};

/// Terminal classification of one task outcome.
///
/// `Pending`, `Skipped` and `Undef` are sentinels: they carry no severity
/// and never participate in aggregation. Everything else is ranked by
/// [`Verdict::severity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    /// Accepted.
    Ac,
    /// Presentation error.
    Pe,
    /// Wrong answer.
    Wa,
    /// Memory limit exceeded.
    Mle,
    /// Time limit exceeded.
    Tle,
    /// Output limit exceeded.
    Ole,
    /// Runtime error.
    Re,
    /// Compilation error.
    Ce,
    /// Unclassified failure.
    Other,
    /// Restricted function (syscall policy violation).
    Rf,
    /// System error.
    Serr,
    /// No verdict yet; the checker still has to run.
    Pending,
    /// Task was not executed.
    Skipped,
    /// Unknown value received over the wire.
    Undef,
}

impl Verdict {
    /// Severity rank used for aggregation. Sentinels have no rank.
    ///
    /// The table is explicit rather than derived from declaration order so
    /// that reordering variants can never silently change grading.
    pub fn severity(self) -> Option<u8> {
        let rank = match self {
            Verdict::Ac => 0,
            Verdict::Pe => 1,
            Verdict::Wa => 2,
            Verdict::Mle => 3,
            Verdict::Tle => 4,
            Verdict::Ole => 5,
            Verdict::Re => 6,
            Verdict::Ce => 7,
            Verdict::Other => 8,
            Verdict::Rf => 9,
            Verdict::Serr => 10,
            Verdict::Pending | Verdict::Skipped | Verdict::Undef => return None,
        };
        Some(rank)
    }

    /// `true` iff both verdicts are ranked and `self` is strictly more
    /// severe. Sentinels compare with nothing.
    pub fn outranks(self, other: Verdict) -> bool {
        matches!((self.severity(), other.severity()), (Some(a), Some(b)) if a > b)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ac => "AC",
            Verdict::Pe => "PE",
            Verdict::Wa => "WA",
            Verdict::Mle => "MLE",
            Verdict::Tle => "TLE",
            Verdict::Ole => "OLE",
            Verdict::Re => "RE",
            Verdict::Ce => "CE",
            Verdict::Other => "OTHER",
            Verdict::Rf => "RF",
            Verdict::Serr => "SERR",
            Verdict::Pending => "PENDING",
            Verdict::Skipped => "SKIPPED",
            Verdict::Undef => "UNDEF",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
