//! Qualified names and structural path expressions.
//!
//! A node's *structural path* is the sequence of names from the document root
//! down to the node, e.g. `/shop/item/@id`. Index definitions restrict
//! themselves with path *patterns* that additionally allow the descendant axis
//! (`//price`) and wildcards (`/shop/*`).

use std::fmt;
use std::str::FromStr;

use arbor_error::{ArborError, Result};
use smallvec::SmallVec;

use crate::encoding::{ByteReader, ByteWriter};

/// A possibly prefixed name (`prefix:local`).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
}

impl QName {
    #[must_use]
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
        }
    }

    #[must_use]
    pub fn prefixed(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local: local.into(),
        }
    }

    /// Parse `local` or `prefix:local`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((p, l)) if !p.is_empty() && !l.is_empty() => Self::prefixed(p, l),
            _ => Self::local(s),
        }
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        match &self.prefix {
            Some(p) => {
                w.put_u8(1);
                w.put_str(p);
            }
            None => w.put_u8(0),
        }
        w.put_str(&self.local);
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let prefix = match r.get_u8()? {
            0 => None,
            1 => Some(r.get_string()?),
            other => return Err(ArborError::corrupt(format!("invalid qname tag {other}"))),
        };
        Ok(Self {
            prefix,
            local: r.get_string()?,
        })
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{p}:{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

impl From<&str> for QName {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum PathAxis {
    /// `/step`
    Child,
    /// `//step`: the step matches at any depth below the current position.
    Descendant,
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum StepTest {
    Name(String),
    Wildcard,
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct PathStep {
    pub axis: PathAxis,
    pub test: StepTest,
    /// `@name` steps only match attributes, plain steps never do.
    pub attribute: bool,
}

impl PathStep {
    #[must_use]
    pub fn child(name: impl Into<String>) -> Self {
        Self {
            axis: PathAxis::Child,
            test: StepTest::Name(name.into()),
            attribute: false,
        }
    }

    #[must_use]
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            axis: PathAxis::Child,
            test: StepTest::Name(name.into()),
            attribute: true,
        }
    }

    fn accepts(&self, concrete: &Self) -> bool {
        if self.attribute != concrete.attribute {
            return false;
        }
        match (&self.test, &concrete.test) {
            (StepTest::Wildcard, _) => true,
            (StepTest::Name(want), StepTest::Name(have)) => want == have,
            (StepTest::Name(_), StepTest::Wildcard) => false,
        }
    }

    const fn is_concrete(&self) -> bool {
        matches!(self.axis, PathAxis::Child) && matches!(self.test, StepTest::Name(_))
    }
}

/// A structural path or path pattern.
///
/// The empty path (`/`) denotes the document root. Paths order step by
/// step, so names containing `/` or `*` never collide with other paths.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Path {
    steps: SmallVec<[PathStep; 6]>,
}

impl Path {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_steps(steps: impl IntoIterator<Item = PathStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Parse a path expression such as `/a/b`, `//b`, `/a/@id` or `/a/*`.
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |detail: &str| ArborError::InvalidPath {
            path: expr.to_owned(),
            detail: detail.to_owned(),
        };
        let trimmed = expr.trim();
        if !trimmed.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }
        if trimmed == "/" {
            return Ok(Self::root());
        }
        let mut steps = SmallVec::new();
        let mut rest = trimmed;
        while !rest.is_empty() {
            let axis = if let Some(r) = rest.strip_prefix("//") {
                rest = r;
                PathAxis::Descendant
            } else if let Some(r) = rest.strip_prefix('/') {
                rest = r;
                PathAxis::Child
            } else {
                return Err(invalid("expected '/'"));
            };
            let end = rest.find('/').unwrap_or(rest.len());
            let (token, tail) = rest.split_at(end);
            rest = tail;
            let (attribute, name) = match token.strip_prefix('@') {
                Some(n) => (true, n),
                None => (false, token),
            };
            if name.is_empty() {
                return Err(invalid("empty step"));
            }
            if name.contains(|c: char| c.is_whitespace() || c == '@' || c == '[') {
                return Err(invalid("illegal character in step"));
            }
            let test = if name == "*" {
                StepTest::Wildcard
            } else {
                StepTest::Name(name.to_owned())
            };
            steps.push(PathStep {
                axis,
                test,
                attribute,
            });
        }
        if steps
            .iter()
            .rev()
            .skip(1)
            .any(|s: &PathStep| s.attribute)
        {
            return Err(invalid("attribute step must be last"));
        }
        Ok(Self { steps })
    }

    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether every step is a child step with a name test.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.steps.iter().all(PathStep::is_concrete)
    }

    /// Append a step, producing the path of a child.
    #[must_use]
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// Whether this pattern matches the concrete structural path `concrete`.
    #[must_use]
    pub fn matches(&self, concrete: &Self) -> bool {
        match_from(&self.steps, &concrete.steps)
    }

    /// Step count, then per step a flag byte and the name, if any.
    /// Names are stored verbatim, so any string is a valid step name.
    pub fn encode(&self, w: &mut ByteWriter) {
        w.put_varint(self.steps.len() as u64);
        for step in &self.steps {
            let mut flags = 0;
            if step.axis == PathAxis::Descendant {
                flags |= STEP_DESCENDANT;
            }
            if step.attribute {
                flags |= STEP_ATTRIBUTE;
            }
            match &step.test {
                StepTest::Name(name) => {
                    w.put_u8(flags);
                    w.put_str(name);
                }
                StepTest::Wildcard => w.put_u8(flags | STEP_WILDCARD),
            }
        }
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.get_varint()?;
        let mut steps = SmallVec::new();
        for _ in 0..count {
            let flags = r.get_u8()?;
            if flags & !(STEP_DESCENDANT | STEP_ATTRIBUTE | STEP_WILDCARD) != 0 {
                return Err(ArborError::corrupt(format!("invalid path step flags {flags:#x}")));
            }
            let test = if flags & STEP_WILDCARD == 0 {
                StepTest::Name(r.get_string()?)
            } else {
                StepTest::Wildcard
            };
            steps.push(PathStep {
                axis: if flags & STEP_DESCENDANT == 0 {
                    PathAxis::Child
                } else {
                    PathAxis::Descendant
                },
                test,
                attribute: flags & STEP_ATTRIBUTE != 0,
            });
        }
        Ok(Self { steps })
    }
}

const STEP_DESCENDANT: u8 = 0b001;
const STEP_ATTRIBUTE: u8 = 0b010;
const STEP_WILDCARD: u8 = 0b100;

fn match_from(pattern: &[PathStep], concrete: &[PathStep]) -> bool {
    let Some((step, rest)) = pattern.split_first() else {
        return concrete.is_empty();
    };
    match step.axis {
        PathAxis::Child => concrete
            .split_first()
            .is_some_and(|(c, tail)| step.accepts(c) && match_from(rest, tail)),
        PathAxis::Descendant => (0..concrete.len())
            .any(|k| step.accepts(&concrete[k]) && match_from(rest, &concrete[k + 1..])),
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("/");
        }
        for step in &self.steps {
            f.write_str(match step.axis {
                PathAxis::Child => "/",
                PathAxis::Descendant => "//",
            })?;
            if step.attribute {
                f.write_str("@")?;
            }
            match &step.test {
                StepTest::Name(n) => f.write_str(n)?,
                StepTest::Wildcard => f.write_str("*")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
