use regex::Regex;

/// Compiled include/exclude patterns applied to raw log lines
#[derive(Clone, Default)]
pub struct LineFilter {
    /// A line matching any of these is dropped
    exclude: Vec<Regex>,

    /// When non-empty, a line must match at least one of these
    include: Vec<Regex>,
}

impl LineFilter {
    /// Compile a filter from pattern strings
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self, regex::Error>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Check whether a line survives the filter. Exclusion wins over inclusion.
    pub fn accepts(&self, line: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(line)) {
            return false;
        }

        self.include.is_empty() || self.include.iter().any(|re| re.is_match(line))
    }

    /// Check if filter is empty (accepts everything)
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

fn compile<P>(patterns: P) -> Result<Vec<Regex>, regex::Error>
where
    P: IntoIterator,
    P::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| Regex::new(p.as_ref()))
        .collect()
}

impl std::fmt::Debug for LineFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let patterns = |res: &[Regex]| res.iter().map(|r| r.as_str().to_string()).collect::<Vec<_>>();
        f.debug_struct("LineFilter")
            .field("include", &patterns(&self.include))
            .field("exclude", &patterns(&self.exclude))
            .finish()
    }
}
