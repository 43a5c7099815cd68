//! # Path Pattern Matching
//!
//! Policy table keys are path patterns matched segment by segment:
//!
//! - a literal segment matches itself exactly
//! - `*` matches exactly one segment
//! - `**` matches any remaining suffix, including the empty one
//!
//! Specificity is the count of non-wildcard characters in the pattern, so
//! `/api/admin/*` outranks `/api/*` for `/api/admin/users` and literal-heavy
//! patterns always beat broad catch-alls.

/// A parsed path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    CatchAll,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Self {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s {
                "*" => Segment::Single,
                "**" => Segment::CatchAll,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains no wildcards at all
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Count of non-wildcard characters; higher means more specific
    pub fn specificity(&self) -> usize {
        self.raw.chars().filter(|&c| c != '*').count()
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        matches_segments(&self.segments, &parts)
    }
}

fn matches_segments(pattern: &[Segment], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => parts.is_empty(),
        Some((Segment::CatchAll, rest)) => {
            // try consuming zero or more path segments
            (0..=parts.len()).any(|skip| matches_segments(rest, &parts[skip..]))
        }
        Some((head, rest)) => {
            let Some((part, tail)) = parts.split_first() else {
                return false;
            };
            let head_matches = match head {
                Segment::Literal(lit) => lit == part,
                Segment::Single => true,
                Segment::CatchAll => unreachable!(),
            };
            head_matches && matches_segments(rest, tail)
        }
    }
}
